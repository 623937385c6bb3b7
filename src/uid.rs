//! UID generation for locally created events.
//!
//! Produces RFC 5545-compatible `UID` values: a random component plus a
//! stable `@corkboard` suffix identifying this client, mirroring the
//! `instance@host`-style UIDs most CalDAV servers already emit.

use uuid::Uuid;

const CLIENT_SUFFIX: &str = "@corkboard-core";

/// Generate a new, globally-unique event UID.
pub fn generate_uid() -> String {
    format!("{}{}", Uuid::new_v4(), CLIENT_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_uids_are_unique_and_suffixed() {
        let a = generate_uid();
        let b = generate_uid();
        assert_ne!(a, b);
        assert!(a.ends_with(CLIENT_SUFFIX));
    }
}
