//! Text of newly created managed host entries.

use std::borrow::Cow;

/// `Hostname` written into every managed entry.
pub const MANAGED_HOSTNAME: &str = "0.0.0.0";

/// `User` written into every managed entry.
pub const MANAGED_USER: &str = "brev";

/// `IdentityFile` token written for a key path; double-quoted when the path
/// contains whitespace.
pub fn identity_file_token(path: &str) -> Cow<'_, str> {
    if path.contains(char::is_whitespace) {
        Cow::Owned(format!("\"{path}\""))
    } else {
        Cow::Borrowed(path)
    }
}

/// Render a managed host block.
///
/// Layout is fixed: header, four two-space indented directives, then one
/// blank line. Parsing the result back yields the same alias and port, and
/// an `IdentityFile` token equal to [`identity_file_token`] of the key path.
pub fn render_entry(alias: &str, port: &str, identity_file: &str) -> String {
    let identity_file = identity_file_token(identity_file);
    format!(
        "Host {alias}\n  Hostname {MANAGED_HOSTNAME}\n  IdentityFile {identity_file}\n  User {MANAGED_USER}\n  Port {port}\n\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::{HostBlock, KeyMatch, SshConfigDocument};
    use crate::core::ownership::{IdentityFileClassifier, OwnershipClassifier};

    #[test]
    fn exact_layout() {
        insta::assert_snapshot!(
            render_entry("ws-1", "2222", "/home/dev/.brev/brev.pem").trim_end(),
            @r"
        Host ws-1
          Hostname 0.0.0.0
          IdentityFile /home/dev/.brev/brev.pem
          User brev
          Port 2222
        "
        );
        assert!(render_entry("a", "1", "/k").ends_with("Port 1\n\n"));
    }

    #[test]
    fn render_then_parse_is_lossless() {
        let key = "/Users/some one/.brev/brev.pem";
        let text = render_entry("my-ws.brev.sh", "2230", key);
        assert!(text.contains("  IdentityFile \"/Users/some one/.brev/brev.pem\"\n"));
        let doc = SshConfigDocument::parse(&text);
        let hosts: Vec<&HostBlock> = doc.hosts().collect();
        assert_eq!(hosts.len(), 1);

        let host = hosts[0];
        let classifier = IdentityFileClassifier::new(key);
        assert!(classifier.is_managed(host));
        assert_eq!(classifier.alias(host), Some("my-ws.brev.sh"));
        assert_eq!(host.port(), Some("2230"));
        assert_eq!(host.directive("Hostname", KeyMatch::Exact), Some(MANAGED_HOSTNAME));
        assert_eq!(host.directive("User", KeyMatch::Exact), Some(MANAGED_USER));
        assert_eq!(doc.to_string(), text);
    }

    #[test]
    fn only_paths_with_whitespace_are_quoted() {
        assert_eq!(identity_file_token("/home/dev/.brev/brev.pem"), "/home/dev/.brev/brev.pem");
        assert_eq!(identity_file_token("/a b/k"), "\"/a b/k\"");
        assert_eq!(identity_file_token("/a\tb/k"), "\"/a\tb/k\"");
    }
}
