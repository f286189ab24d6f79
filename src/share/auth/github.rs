//! Authorization against the keys a GitHub account publishes.

use russh::keys::PublicKey;
use tracing::{debug, info, warn};

use crate::share::keys::KeyList;

use super::traits::KeyAuthorizer;

/// Accepts any key published by one GitHub account.
pub struct GitHubKeys {
    account: String,
    keys: KeyList,
}

impl GitHubKeys {
    /// Create an authorizer for `account` over its fetched key list.
    pub fn new(account: impl Into<String>, keys: KeyList) -> Self {
        Self {
            account: account.into(),
            keys,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }
}

impl KeyAuthorizer for GitHubKeys {
    fn authorize(&self, offered: &PublicKey) -> bool {
        authenticate(&self.account, &self.keys, offered)
    }

    fn name(&self) -> &'static str {
        "github"
    }
}

/// Scan `keys` in order for an entry equal to `offered`.
///
/// Each entry is parsed as an authorized-key line. Entries that fail to parse
/// are skipped with a warning naming only their index. The first entry whose
/// algorithm and key material equal the offered key wins; comments are ignored.
/// Returns `false` when the list is exhausted without a match.
pub fn authenticate(account: &str, keys: &KeyList, offered: &PublicKey) -> bool {
    for (index, candidate) in keys.iter().enumerate() {
        debug!("Testing key {} for @{}", index, account);

        let parsed = match PublicKey::from_openssh(candidate) {
            Ok(key) => key,
            Err(_) => {
                warn!("Skipping invalid public key {}", index);
                continue;
            }
        };

        if parsed.key_data() == offered.key_data() {
            info!("@{} has connected!", account);
            return true;
        }
    }

    warn!(
        "Rejecting connection: No matching public key for @{}",
        account
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::share::fixtures::{ALICE_ED25519, ALICE_RSA, MALLORY_ED25519, public_key};

    fn alice_keys() -> KeyList {
        [ALICE_ED25519, "not-a-key", ALICE_RSA].into_iter().collect()
    }

    mod authenticate_fn {
        use super::*;

        #[test]
        fn test_accepts_key_after_malformed_entry() {
            let offered = public_key(ALICE_RSA);
            assert!(authenticate("alice", &alice_keys(), &offered));
        }

        #[test]
        fn test_accepts_first_entry() {
            let offered = public_key(ALICE_ED25519);
            assert!(authenticate("alice", &alice_keys(), &offered));
        }

        #[test]
        fn test_rejects_unrelated_key() {
            let offered = public_key(MALLORY_ED25519);
            assert!(!authenticate("alice", &alice_keys(), &offered));
        }

        #[test]
        fn test_rejects_on_empty_list() {
            let offered = public_key(ALICE_ED25519);
            assert!(!authenticate("alice", &KeyList::default(), &offered));
        }

        #[test]
        fn test_rejects_when_every_entry_is_malformed() {
            let keys: KeyList = ["", "ssh-ed25519", "ssh-ed25519 !!!notbase64!!!", "garbage"]
                .into_iter()
                .collect();
            let offered = public_key(ALICE_ED25519);
            assert!(!authenticate("alice", &keys, &offered));
        }

        #[test]
        fn test_malformed_entries_anywhere_do_not_hide_match() {
            let layouts: Vec<Vec<&str>> = vec![
                vec!["junk", ALICE_ED25519],
                vec![ALICE_ED25519, "junk"],
                vec!["", "junk", ALICE_ED25519, "", "junk"],
                vec![MALLORY_ED25519, "junk", ALICE_ED25519],
            ];
            let offered = public_key(ALICE_ED25519);

            for layout in layouts {
                let keys: KeyList = layout.clone().into_iter().collect();
                assert!(
                    authenticate("alice", &keys, &offered),
                    "no match found in {:?}",
                    layout
                );
            }
        }

        #[test]
        fn test_ignores_comment_differences() {
            let recommented = ALICE_ED25519.replace("alice@laptop", "someone-else");
            let keys: KeyList = [recommented].into_iter().collect();
            let offered = public_key(ALICE_ED25519);
            assert!(authenticate("alice", &keys, &offered));
        }

        #[test]
        fn test_same_algorithm_different_material_is_rejected() {
            let keys: KeyList = [MALLORY_ED25519].into_iter().collect();
            let offered = public_key(ALICE_ED25519);
            assert!(!authenticate("alice", &keys, &offered));
        }

        #[test]
        fn test_blank_trailing_entry_from_body() {
            let body = format!("{}\n", ALICE_RSA);
            let keys = KeyList::from_body(&body);
            assert!(authenticate("alice", &keys, &public_key(ALICE_RSA)));
            assert!(!authenticate("alice", &keys, &public_key(ALICE_ED25519)));
        }
    }

    mod authorizer {
        use super::*;

        #[test]
        fn test_github_keys_name() {
            let auth = GitHubKeys::new("alice", KeyList::default());
            assert_eq!(auth.name(), "github");
            assert_eq!(auth.account(), "alice");
        }

        #[test]
        fn test_github_keys_delegates_to_scan() {
            let auth = GitHubKeys::new("alice", alice_keys());
            assert!(auth.authorize(&public_key(ALICE_ED25519)));
            assert!(!auth.authorize(&public_key(MALLORY_ED25519)));
        }

        #[test]
        fn test_usable_as_trait_object() {
            let auth: Box<dyn KeyAuthorizer> = Box::new(GitHubKeys::new("alice", alice_keys()));
            assert!(auth.authorize(&public_key(ALICE_RSA)));
        }

        #[test]
        fn test_authorizer_is_send_sync() {
            fn assert_send_sync<T: Send + Sync>() {}
            assert_send_sync::<GitHubKeys>();
        }
    }
}
