//! Parsers for `security find-identity` and `security find-certificate` output

use crate::error::{CollectorError, Result};
use std::collections::HashMap;
use std::process::Output;

/// Stdout of a finished `security` subcommand.
///
/// A non-zero exit is a `CommandExecution` error carrying stderr, so a failed
/// query is never mistaken for an empty listing.
pub(super) fn checked_stdout(subcommand: &str, output: &Output) -> Result<String> {
    if !output.status.success() {
        return Err(CollectorError::CommandExecution(format!(
            "security {subcommand} failed with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// One identity listed by `security find-identity -v -p codesigning`
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ListedIdentity {
    /// Uppercase hex SHA-1 of the certificate
    pub sha1: String,
    pub name: String,
}

/// Extract `(sha1, name)` pairs, deduplicated by SHA-1
///
/// Format: `  1) 0123456789ABCDEF0123456789ABCDEF01234567 "iPhone Developer: Jane Doe (ABCDE12345)"`
pub(super) fn parse_find_identity(stdout: &str) -> Vec<ListedIdentity> {
    let mut listed: Vec<ListedIdentity> = Vec::new();

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.contains("valid identities found") {
            continue;
        }

        let Some((_, rest)) = trimmed.split_once(") ") else {
            continue;
        };
        let Some((hash, quoted)) = rest.split_once(' ') else {
            continue;
        };
        if hash.len() != 40 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }

        let sha1 = hash.to_ascii_uppercase();
        if listed.iter().any(|entry| entry.sha1 == sha1) {
            continue;
        }

        listed.push(ListedIdentity {
            sha1,
            name: quoted.trim().trim_matches('"').to_string(),
        });
    }

    listed
}

/// Map certificate SHA-1 to PEM from `security find-certificate -a -Z -p`
pub(super) fn parse_find_certificate(stdout: &str) -> HashMap<String, String> {
    let mut certificates = HashMap::new();
    let mut current_sha1: Option<String> = None;
    let mut pem: Option<String> = None;

    for line in stdout.lines() {
        if let Some(hash) = line.strip_prefix("SHA-1 hash:") {
            current_sha1 = Some(hash.trim().to_ascii_uppercase());
            continue;
        }

        if line.starts_with("-----BEGIN CERTIFICATE-----") {
            pem = Some(String::new());
        }

        if let Some(block) = pem.as_mut() {
            block.push_str(line);
            block.push('\n');

            if line.starts_with("-----END CERTIFICATE-----") {
                if let (Some(sha1), Some(block)) = (current_sha1.take(), pem.take()) {
                    certificates.insert(sha1, block);
                }
                pem = None;
            }
        }
    }

    certificates
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            // Wait status layout: exit code in the second byte
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_failed_query_is_command_error() {
        let failed = output(
            44,
            "",
            "security: SecKeychainSearchCopyNext: The specified keychain could not be found.",
        );

        match checked_stdout("find-certificate", &failed) {
            Err(CollectorError::CommandExecution(message)) => {
                assert!(message.contains("find-certificate"));
                assert!(message.contains("could not be found"));
            }
            other => panic!("expected command error, got {other:?}"),
        }
    }

    #[test]
    fn test_successful_query_yields_stdout() {
        let listing = "  1) 0A1B2C3D4E5F60718293A4B5C6D7E8F901234567 \"iPhone Developer: Jane Doe (ABCDE12345)\"\n";
        let stdout = checked_stdout("find-identity", &output(0, listing, "")).unwrap();
        assert_eq!(parse_find_identity(&stdout).len(), 1);
    }

    const FIND_IDENTITY: &str = r#"
Policy: Code Signing
  Matching identities
  1) 0A1B2C3D4E5F60718293A4B5C6D7E8F901234567 "iPhone Developer: Jane Doe (ABCDE12345)"
  2) FFEEDDCCBBAA99887766554433221100FFEEDDCC "Developer ID Application: Acme Inc (TEAM123456)"
  3) 0a1b2c3d4e5f60718293a4b5c6d7e8f901234567 "iPhone Developer: Jane Doe (ABCDE12345)"
     3 valid identities found
"#;

    #[test]
    fn test_parse_find_identity() {
        let listed = parse_find_identity(FIND_IDENTITY);
        assert_eq!(
            listed,
            vec![
                ListedIdentity {
                    sha1: "0A1B2C3D4E5F60718293A4B5C6D7E8F901234567".to_string(),
                    name: "iPhone Developer: Jane Doe (ABCDE12345)".to_string(),
                },
                ListedIdentity {
                    sha1: "FFEEDDCCBBAA99887766554433221100FFEEDDCC".to_string(),
                    name: "Developer ID Application: Acme Inc (TEAM123456)".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_find_identity_empty() {
        assert!(parse_find_identity("     0 valid identities found\n").is_empty());
        assert!(parse_find_identity("  1) nothex \"Name\"").is_empty());
    }

    #[test]
    fn test_parse_find_certificate() {
        let output = "\
SHA-256 hash: 1111111111111111111111111111111111111111111111111111111111111111
SHA-1 hash: 0a1b2c3d4e5f60718293a4b5c6d7e8f901234567
keychain: \"/Users/jane/Library/Keychains/login.keychain-db\"
-----BEGIN CERTIFICATE-----
MIIBfirst
-----END CERTIFICATE-----
SHA-256 hash: 2222222222222222222222222222222222222222222222222222222222222222
SHA-1 hash: FFEEDDCCBBAA99887766554433221100FFEEDDCC
-----BEGIN CERTIFICATE-----
MIIBsecond
line2
-----END CERTIFICATE-----
";

        let certificates = parse_find_certificate(output);
        assert_eq!(certificates.len(), 2);
        assert_eq!(
            certificates["0A1B2C3D4E5F60718293A4B5C6D7E8F901234567"],
            "-----BEGIN CERTIFICATE-----\nMIIBfirst\n-----END CERTIFICATE-----\n"
        );
        assert!(certificates["FFEEDDCCBBAA99887766554433221100FFEEDDCC"].contains("line2\n"));
    }
}
