//! Finalizer marker owned by the engine.
//!
//! The marker blocks removal of a managed resource until the engine has
//! deleted (or deliberately orphaned) the external resource behind it.

use crate::resource::ObjectMeta;

/// The one finalizer this engine adds and removes.
pub const FINALIZER: &str = "finalizer.converge.mvirt.io";

pub fn has(meta: &ObjectMeta) -> bool {
    meta.finalizers.iter().any(|f| f == FINALIZER)
}

/// Add the marker. Returns false if it was already present.
pub fn add(meta: &mut ObjectMeta) -> bool {
    if has(meta) {
        return false;
    }
    meta.finalizers.push(FINALIZER.to_string());
    true
}

/// Remove the marker, leaving foreign finalizers in place. Returns false if
/// it was not present.
pub fn remove(meta: &mut ObjectMeta) -> bool {
    let before = meta.finalizers.len();
    meta.finalizers.retain(|f| f != FINALIZER);
    meta.finalizers.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut meta = ObjectMeta::new(Some("default"), "db1");
        assert!(add(&mut meta));
        assert!(!add(&mut meta));
        assert_eq!(meta.finalizers, vec![FINALIZER.to_string()]);
    }

    #[test]
    fn test_remove_keeps_foreign_finalizers() {
        let mut meta = ObjectMeta::new(Some("default"), "db1");
        meta.finalizers.push("backup.example.io".to_string());
        add(&mut meta);

        assert!(remove(&mut meta));
        assert!(!has(&meta));
        assert_eq!(meta.finalizers, vec!["backup.example.io".to_string()]);
        assert!(!remove(&mut meta));
    }
}
