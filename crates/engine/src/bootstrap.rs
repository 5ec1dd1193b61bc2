//! Client-side storage seeding scripts.
//!
//! The target site reads the device fingerprint and user ids from
//! localStorage at startup, so a replayed context must have them in
//! place before the app boots. Two scripts cooperate:
//!
//! * the init script runs before any page script on every navigation
//!   and writes the fingerprint key when it is missing;
//! * the seed script runs once after the first load, writes the full
//!   key set, and reports success so the engine can force the reload
//!   that lets the app boot against seeded storage.

use crate::config::TargetProfile;
use crate::credential::SessionCredential;

/// Values pushed into the context's localStorage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapData {
    pub fingerprint: String,
    pub platform_user_id: String,
    pub user_id: String,
}

impl BootstrapData {
    pub fn from_credential(credential: &SessionCredential) -> Self {
        Self {
            fingerprint: credential.fingerprint.clone(),
            platform_user_id: credential.platform_user_id.clone(),
            user_id: credential.user_id.clone(),
        }
    }
}

/// Escapes `s` for embedding inside a single-quoted JS string literal.
pub fn js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn set_item(key: &str, value: &str) -> String {
    format!(
        "localStorage.setItem({}, {});",
        js_string(key),
        js_string(value)
    )
}

/// Script registered at context creation. Runs before page scripts on
/// every navigation and backfills the fingerprint key, so the site sees
/// the replayed fingerprint even on the very first load.
pub fn init_script(profile: &TargetProfile, data: &BootstrapData) -> String {
    if data.fingerprint.is_empty() {
        return String::new();
    }
    format!(
        "(() => {{\n  try {{\n    if (!localStorage.getItem({key})) {{\n      {set}\n    }}\n  }} catch (e) {{}}\n}})();",
        key = js_string(&profile.fingerprint_storage_key),
        set = set_item(&profile.fingerprint_storage_key, &data.fingerprint),
    )
}

/// Script evaluated after the first load completes. Writes the full
/// storage set and yields `true`, or `false` when storage is
/// inaccessible (sandboxed frame, storage disabled).
pub fn seed_script(profile: &TargetProfile, data: &BootstrapData) -> String {
    let mut writes = Vec::new();
    if !data.fingerprint.is_empty() {
        writes.push(set_item(&profile.fingerprint_storage_key, &data.fingerprint));
    }
    if !data.platform_user_id.is_empty() {
        writes.push(set_item(
            &profile.platform_user_storage_key,
            &data.platform_user_id,
        ));
    }
    if !data.user_id.is_empty() {
        writes.push(set_item(&profile.user_storage_key, &data.user_id));
    }

    format!(
        "(() => {{\n  try {{\n    {writes}\n    return true;\n  }} catch (e) {{\n    return false;\n  }}\n}})();",
        writes = writes.join("\n    "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> BootstrapData {
        BootstrapData {
            fingerprint: "fp-123".into(),
            platform_user_id: "7".into(),
            user_id: "42".into(),
        }
    }

    #[test]
    fn js_string_escapes_quotes_and_newlines() {
        assert_eq!(js_string(r"a'b\c"), r"'a\'b\\c'");
        assert_eq!(js_string("a\nb"), r"'a\nb'");
    }

    #[test]
    fn seed_script_writes_all_keys() {
        let script = seed_script(&TargetProfile::default(), &data());
        assert!(script.contains("localStorage.setItem('x-bc', 'fp-123');"));
        assert!(script.contains("localStorage.setItem('platformUserId', '7');"));
        assert!(script.contains("localStorage.setItem('userId', '42');"));
        assert!(script.contains("return true;"));
    }

    #[test]
    fn seed_script_skips_empty_fields() {
        let mut data = data();
        data.platform_user_id.clear();
        let script = seed_script(&TargetProfile::default(), &data);
        assert!(!script.contains("platformUserId"));
        assert!(script.contains("userId"));
    }

    #[test]
    fn init_script_only_backfills_when_absent() {
        let script = init_script(&TargetProfile::default(), &data());
        assert!(script.contains("if (!localStorage.getItem('x-bc'))"));
        assert!(script.contains("localStorage.setItem('x-bc', 'fp-123');"));
    }

    #[test]
    fn init_script_is_empty_without_fingerprint() {
        let mut data = data();
        data.fingerprint.clear();
        assert!(init_script(&TargetProfile::default(), &data).is_empty());
    }

    #[test]
    fn from_credential_copies_identity_fields() {
        let cred = SessionCredential {
            id: "s1".into(),
            cookie_blob: "a=b".into(),
            fingerprint: "f".into(),
            platform_user_id: "7".into(),
            user_id: "42".into(),
            ..Default::default()
        };
        let data = BootstrapData::from_credential(&cred);
        assert_eq!(data.fingerprint, "f");
        assert_eq!(data.platform_user_id, "7");
        assert_eq!(data.user_id, "42");
    }
}
