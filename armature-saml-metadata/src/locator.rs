//! Metadata locations.

use crate::error::{MetadataError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use url::Url;

/// Where a metadata document lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetadataLocator {
    /// Local file, from a `file://` URL or a plain path.
    File(PathBuf),
    /// `http://` or `https://` URL.
    Http(Url),
}

impl MetadataLocator {
    /// Parses a locator. Plain paths are files; URLs must use the `file`,
    /// `http` or `https` scheme.
    pub fn parse(location: &str) -> Result<Self> {
        match Url::parse(location) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Http(url)),
                "file" => url
                    .to_file_path()
                    .map(Self::File)
                    .map_err(|_| MetadataError::UnsupportedLocator(location.to_owned())),
                _ => Err(MetadataError::UnsupportedLocator(location.to_owned())),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self::File(PathBuf::from(location))),
            Err(_) => Err(MetadataError::UnsupportedLocator(location.to_owned())),
        }
    }
}

impl FromStr for MetadataLocator {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for MetadataLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Http(url) => write!(f, "{url}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_locators() {
        let locator = MetadataLocator::parse("https://idp.example.com/metadata").unwrap();
        assert!(matches!(locator, MetadataLocator::Http(_)));
        assert_eq!(locator.to_string(), "https://idp.example.com/metadata");
        assert!(matches!(
            MetadataLocator::parse("http://localhost:8080/md").unwrap(),
            MetadataLocator::Http(_)
        ));
    }

    #[test]
    fn test_file_locators() {
        assert_eq!(
            MetadataLocator::parse("file:///etc/saml/idp.xml").unwrap(),
            MetadataLocator::File(PathBuf::from("/etc/saml/idp.xml"))
        );
        assert_eq!(
            "metadata/idp.xml".parse::<MetadataLocator>().unwrap(),
            MetadataLocator::File(PathBuf::from("metadata/idp.xml"))
        );
    }

    #[test]
    fn test_other_schemes_rejected() {
        for location in ["ftp://example.com/md.xml", "ldap://example.com", "data:text/xml,<a/>"] {
            assert_eq!(
                MetadataLocator::parse(location),
                Err(MetadataError::UnsupportedLocator(location.to_owned()))
            );
        }
    }
}
