//! Server-issued opaque identifiers.

use rand::RngCore;

fn random_hex16() -> String {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn new_session_id() -> String {
    format!("ses_{}", random_hex16())
}

pub fn new_run_id() -> String {
    format!("run_{}", random_hex16())
}

pub fn new_runner_id() -> String {
    format!("rnr_{}", random_hex16())
}

/// Short suffix for generated session names.
pub fn short_suffix() -> String {
    let mut bytes = [0u8; 3];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shapes() {
        let id = new_session_id();
        assert!(id.starts_with("ses_"));
        assert_eq!(id.len(), 4 + 16);

        assert!(new_run_id().starts_with("run_"));
        assert!(new_runner_id().starts_with("rnr_"));
        assert_eq!(short_suffix().len(), 6);
    }

    #[test]
    fn test_ids_are_distinct() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
