//! Optional username/password for devices that need cloud credentials.
use std::{fmt, fs, path::Path};

use tracing::{debug, info, warn};

const USERNAME_KEY: &str = "KASA_USERNAME";
const PASSWORD_KEY: &str = "KASA_PASSWORD";

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Both halves present; discovery only authenticates in that case.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Load from a `KEY=VALUE` file. A missing or unreadable file yields empty credentials.
    pub fn from_env_file<P: AsRef<Path>>(path: P) -> Credentials {
        let path = path.as_ref();
        if !path.exists() {
            info!(
                path = %path.display(),
                "no credentials file found; create one with {} and {} if needed",
                USERNAME_KEY,
                PASSWORD_KEY
            );
            return Credentials::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => {
                let credentials = Credentials::parse(&contents);
                info!(
                    path = %path.display(),
                    username = %credentials.masked_username(),
                    "loaded credentials"
                );
                credentials
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read credentials file");
                Credentials::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Credentials {
        let mut credentials = Credentials::default();

        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                debug!(%line, "ignoring line without '='");
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');

            match key.trim() {
                USERNAME_KEY => credentials.username = value.to_string(),
                PASSWORD_KEY => credentials.password = value.to_string(),
                _ => {}
            }
        }

        credentials
    }

    fn masked_username(&self) -> String {
        if self.username.is_empty() {
            String::from("not set")
        } else {
            "*".repeat(self.username.chars().count())
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_quoted_values() {
        let credentials = Credentials::parse("KASA_USERNAME=foo\nKASA_PASSWORD=\"bar baz\"\n");

        assert_eq!("foo", credentials.username);
        assert_eq!("bar baz", credentials.password);
        assert!(credentials.is_complete());
    }

    #[test]
    fn parse_skips_comments_and_junk() {
        let contents = "
# KASA_USERNAME=commented
OTHER=value
not a pair
  KASA_USERNAME = 'me@example.com'
KASA_PASSWORD=a=b
";
        let credentials = Credentials::parse(contents);

        assert_eq!("me@example.com", credentials.username);
        assert_eq!("a=b", credentials.password);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let credentials = Credentials::from_env_file(dir.path().join(".env"));

        assert_eq!(Credentials::default(), credentials);
        assert_eq!("", credentials.username);
        assert_eq!("", credentials.password);
        assert!(!credentials.is_complete());
    }

    #[test]
    fn reads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "KASA_USERNAME=foo").unwrap();
        writeln!(file, "KASA_PASSWORD=\"bar baz\"").unwrap();

        let credentials = Credentials::from_env_file(file.path());

        assert_eq!("foo", credentials.username);
        assert_eq!("bar baz", credentials.password);
    }

    #[test]
    fn unreadable_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        // a directory exists but cannot be read as a file
        let credentials = Credentials::from_env_file(dir.path());

        assert_eq!(Credentials::default(), credentials);
    }

    #[test]
    fn debug_redacts_password() {
        let credentials = Credentials::parse("KASA_USERNAME=foo\nKASA_PASSWORD=secret");
        let debug = format!("{:?}", credentials);

        assert!(debug.contains("foo"));
        assert!(!debug.contains("secret"));
    }
}
