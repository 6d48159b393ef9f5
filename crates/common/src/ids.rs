//! Entity id generation.

use uuid::Uuid;

/// Generate a fresh entity id of the form `<prefix>-<uuid v4>`.
pub fn new_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_prefix_and_uniqueness() {
        let a = new_id("node");
        let b = new_id("node");
        assert!(a.starts_with("node-"));
        assert_ne!(a, b);
    }
}
