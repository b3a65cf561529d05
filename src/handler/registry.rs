//! Extension-to-handler registry.
//!
//! Maps file extensions to handler factories with longest-match,
//! case-insensitive lookup (`.tar.gz` beats `.gz`). Each
//! [`ArcFs`](crate::ArcFs) instance carries its own copy-on-write view of
//! the defaults; user registrations shadow built-ins without affecting
//! other instances.

use std::fmt;
use std::sync::Arc;

use crate::codec::Codec;
use crate::handler::single::SingleHandler;
use crate::handler::tar::TarHandler;
use crate::handler::zip::ZipHandler;
use crate::handler::ArchiveHandler;
use crate::Config;

/// A factory producing a handler for one archive file.
///
/// Receives the archive's file name (for synthetic entry naming and error
/// context) and the effective configuration.
pub type HandlerFactory = Arc<dyn Fn(&str, &Config) -> Box<dyn ArchiveHandler> + Send + Sync>;

/// One registered format: extension, codec chain, handler factory.
#[derive(Clone)]
pub struct Registration {
    extension: String,
    codecs: Vec<Codec>,
    factory: HandlerFactory,
}

impl Registration {
    /// Creates a registration for `extension` (leading dot, lowercase).
    pub fn new(extension: impl Into<String>, codecs: Vec<Codec>, factory: HandlerFactory) -> Self {
        Self {
            extension: extension.into().to_ascii_lowercase(),
            codecs,
            factory,
        }
    }

    /// The extension this registration matches, including the leading dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The codec chain between raw archive bytes and container bytes.
    pub fn codecs(&self) -> &[Codec] {
        &self.codecs
    }

    /// Instantiates the handler for an archive file.
    pub fn make_handler(&self, file_name: &str, config: &Config) -> Box<dyn ArchiveHandler> {
        (self.factory)(file_name, config)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("extension", &self.extension)
            .field("codecs", &self.codecs)
            .finish_non_exhaustive()
    }
}

/// The registry of recognized archive formats.
///
/// Cloning is cheap; mutation copies on write, so a clone handed to one
/// `ArcFs` never observes another instance's registrations.
#[derive(Clone, Debug)]
pub struct HandlerRegistry {
    entries: Arc<Vec<Registration>>,
}

impl HandlerRegistry {
    /// Creates a registry with no registered formats.
    pub fn empty() -> Self {
        Self {
            entries: Arc::new(Vec::new()),
        }
    }

    /// Creates a registry with the default format set.
    ///
    /// ZIP family (`.zip .jar .war .ear .apk`), TAR plain and compressed
    /// (`.tar`, `.tar.gz/.tgz`, `.tar.bz2/.tbz2`, `.tar.xz/.txz`), and the
    /// codec-single formats (`.gz .bz2 .xz`). Codec-dependent formats are
    /// present only when their cargo feature is enabled.
    pub fn with_defaults() -> Self {
        let zip: HandlerFactory = Arc::new(|name, config| Box::new(ZipHandler::new(name, config)));
        let tar: HandlerFactory = Arc::new(|name, config| Box::new(TarHandler::new(name, config)));

        let mut registry = Self::empty();
        for ext in [".zip", ".jar", ".war", ".ear", ".apk"] {
            registry.register(Registration::new(ext, vec![], zip.clone()));
        }

        registry.register(Registration::new(".tar", vec![], tar.clone()));
        registry.register(Registration::new(".tar.gz", vec![Codec::Gzip], tar.clone()));
        registry.register(Registration::new(".tgz", vec![Codec::Gzip], tar.clone()));
        #[cfg(feature = "bzip2")]
        {
            registry.register(Registration::new(".tar.bz2", vec![Codec::Bzip2], tar.clone()));
            registry.register(Registration::new(".tbz2", vec![Codec::Bzip2], tar.clone()));
        }
        #[cfg(feature = "xz")]
        {
            registry.register(Registration::new(".tar.xz", vec![Codec::Xz], tar.clone()));
            registry.register(Registration::new(".txz", vec![Codec::Xz], tar.clone()));
        }

        registry.register(Self::single_registration(".gz", Codec::Gzip));
        #[cfg(feature = "bzip2")]
        registry.register(Self::single_registration(".bz2", Codec::Bzip2));
        #[cfg(feature = "xz")]
        registry.register(Self::single_registration(".xz", Codec::Xz));

        registry
    }

    fn single_registration(ext: &str, codec: Codec) -> Registration {
        let extension = ext.to_string();
        let factory: HandlerFactory = Arc::new(move |name, config| {
            Box::new(SingleHandler::new(name, &extension, config))
        });
        Registration::new(ext, vec![codec], factory)
    }

    /// Registers a format, shadowing any existing registration for the same
    /// extension.
    pub fn register(&mut self, registration: Registration) {
        let entries = Arc::make_mut(&mut self.entries);
        match entries
            .iter_mut()
            .find(|r| r.extension == registration.extension)
        {
            Some(slot) => *slot = registration,
            None => entries.push(registration),
        }
    }

    /// Finds the registration for a file name, longest extension first.
    ///
    /// Matching is case-insensitive and anchored at a name boundary:
    /// `archive.TAR.GZ` matches `.tar.gz`, while a file literally named
    /// `.gz` does not match anything (the whole name is no extension).
    pub fn lookup(&self, file_name: &str) -> Option<&Registration> {
        let lower = file_name.to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|r| lower.len() > r.extension.len() && lower.ends_with(&r.extension))
            .max_by_key(|r| r.extension.len())
    }

    /// Returns `true` if the file name matches a registered format.
    pub fn is_archive_name(&self, file_name: &str) -> bool {
        self.lookup(file_name).is_some()
    }

    /// Finds a registration by exact extension (with or without leading
    /// dot), used for explicit format overrides.
    pub fn by_extension(&self, extension: &str) -> Option<&Registration> {
        let mut wanted = extension.to_ascii_lowercase();
        if !wanted.starts_with('.') {
            wanted.insert(0, '.');
        }
        self.entries.iter().find(|r| r.extension == wanted)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_basic() {
        let registry = HandlerRegistry::with_defaults();
        assert_eq!(registry.lookup("a.zip").unwrap().extension(), ".zip");
        assert_eq!(registry.lookup("a.tar").unwrap().extension(), ".tar");
        assert!(registry.lookup("a.txt").is_none());
        assert!(registry.lookup("plain").is_none());
    }

    #[test]
    fn test_longest_match_wins() {
        let registry = HandlerRegistry::with_defaults();
        let reg = registry.lookup("backup.tar.gz").unwrap();
        assert_eq!(reg.extension(), ".tar.gz");
        assert_eq!(reg.codecs(), &[Codec::Gzip]);
    }

    #[test]
    fn test_case_insensitive() {
        let registry = HandlerRegistry::with_defaults();
        assert_eq!(registry.lookup("A.ZIP").unwrap().extension(), ".zip");
        assert_eq!(registry.lookup("b.Tar.Gz").unwrap().extension(), ".tar.gz");
    }

    #[test]
    fn test_bare_extension_is_not_an_archive() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.lookup(".gz").is_none());
        assert!(registry.lookup(".zip").is_none());
    }

    #[test]
    fn test_gz_single() {
        let registry = HandlerRegistry::with_defaults();
        let reg = registry.lookup("notes.txt.gz").unwrap();
        assert_eq!(reg.extension(), ".gz");
        assert_eq!(reg.codecs(), &[Codec::Gzip]);
    }

    #[test]
    fn test_user_registration_shadows_default() {
        let mut registry = HandlerRegistry::with_defaults();
        let factory: HandlerFactory =
            Arc::new(|name, config| Box::new(TarHandler::new(name, config)));
        registry.register(Registration::new(".zip", vec![], factory));

        let reg = registry.lookup("x.zip").unwrap();
        let handler = reg.make_handler("x.zip", &Config::default());
        assert_eq!(handler.format_name(), "tar");
    }

    #[test]
    fn test_copy_on_write_isolation() {
        let base = HandlerRegistry::with_defaults();
        let mut modified = base.clone();
        let factory: HandlerFactory =
            Arc::new(|name, config| Box::new(ZipHandler::new(name, config)));
        modified.register(Registration::new(".custom", vec![], factory));

        assert!(modified.lookup("f.custom").is_some());
        assert!(base.lookup("f.custom").is_none());
    }

    #[test]
    fn test_by_extension() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.by_extension("zip").is_some());
        assert!(registry.by_extension(".tar.gz").is_some());
        assert!(registry.by_extension("rar").is_none());
    }
}
