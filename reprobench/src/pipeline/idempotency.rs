//! Idempotency keys for stages.
//!
//! A stage's key is recorded in its completion stamp. Changing anything that
//! defines the stage (its action, dependencies, outputs or stage variables)
//! changes the key, which makes the stamp stale.

use sha2::{Digest, Sha256};

/// Generates an idempotency key from components.
#[must_use]
pub fn generate_idempotency_key(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        // Length prefix keeps ["ab", "c"] distinct from ["a", "bc"].
        hasher.update((component.len() as u64).to_le_bytes());
        hasher.update(component.as_bytes());
    }
    let result = hasher.finalize();
    format!("idem:{}", hex::encode(&result[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_idempotency_key() {
        let key1 = generate_idempotency_key(&["build", "ninja", "install"]);
        let key2 = generate_idempotency_key(&["build", "ninja", "install"]);
        let key3 = generate_idempotency_key(&["build", "make", "install"]);

        assert!(key1.starts_with("idem:"));
        assert_eq!(key1.len(), "idem:".len() + 32);
        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_component_boundaries_matter() {
        assert_ne!(
            generate_idempotency_key(&["ab", "c"]),
            generate_idempotency_key(&["a", "bc"])
        );
    }
}
