use sha2::{Digest, Sha256};

/// Calculate SHA-256 hash of input bytes
///
/// # Arguments
/// * `data` - The bytes to hash
/// * `extra` - Optional additional bytes to include in the hash
///
/// # Returns
/// * `String` - The hexadecimal representation of the SHA-256 hash
pub fn sha256v(data: &[u8], extra: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    if let Some(extra_data) = extra {
        hasher.update(extra_data);
    }
    let result = hasher.finalize();
    hex::encode(result)
}

/// Derive a short namespaced identifier by hashing `name` under `namespace`.
///
/// The result is stable across processes and suitable as a map key; 16 hex
/// characters (64 bits) keep collisions negligible at gateway-count scale.
pub fn namespaced_id(namespace: &str, name: &str) -> String {
    let digest = sha256v(namespace.as_bytes(), Some(name.as_bytes()));
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256v() {
        let data = b"hello world";
        let hash = sha256v(data, None);
        assert_eq!(hash.len(), 64);
        // Known SHA-256 of "hello world"
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_namespaced_id() {
        let a = namespaced_id("gateway", "eui-1122334455667788");
        let b = namespaced_id("gateway", "eui-1122334455667788");
        let c = namespaced_id("user", "eui-1122334455667788");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
