use std::path::PathBuf;

use crate::Error;

/// A path with a `{}` placeholder, used to name the companion files of one
/// analysis instance (`uses`, `defs`, `trace`, ...).
#[derive(Debug, Clone)]
pub struct PathTemplate {
    before: String,
    after: String,
}

impl PathTemplate {
    pub fn new(path: &str) -> Result<Self, Error> {
        let at = path.find("{}").ok_or(Error::MissingPlaceholder)?;
        Ok(Self {
            before: path[..at].to_owned(),
            after: path[at + 2..].to_owned(),
        })
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        PathBuf::from(format!("{}{}{}", self.before, name, self.after))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_resolve() {
        let template = PathTemplate::new("out/{}.bin").unwrap();
        assert_eq!(template.resolve("reg-uses"), PathBuf::from("out/reg-uses.bin"));
    }

    #[test]
    fn test_missing_placeholder() {
        assert!(matches!(
            PathTemplate::new("out/plain.bin"),
            Err(Error::MissingPlaceholder)
        ));
    }
}
