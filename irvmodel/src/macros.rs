//! Physical macros supplied by technology libraries.
//!
//! The format of macro files is owned by an injected [`MacroParser`]; this
//! module only indexes what the parser returns. Files registered with
//! [`MacroLibrary::add_lazy_by_path`] are parsed on the first query for their
//! macro name.
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use bigdecimal::BigDecimal;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;

use crate::utils::{Error, ModelResult};

/// A fixed-layout component with a known footprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Macro {
    pub name: String,
    pub size_x: BigDecimal,
    pub size_y: BigDecimal,
    /// File the macro was read from, if any.
    pub source: Option<PathBuf>,
}

impl Macro {
    pub fn new(name: impl Into<String>, size_x: BigDecimal, size_y: BigDecimal) -> Self {
        Self {
            name: name.into(),
            size_x,
            size_y,
            source: None,
        }
    }
}

/// Reads macro definitions out of a library file.
pub trait MacroParser: Send + Sync {
    fn parse(&self, path: &Path) -> ModelResult<Vec<Macro>>;
}

#[derive(Clone)]
struct LazyEntry {
    path: PathBuf,
    cell: Arc<OnceCell<Option<Arc<Macro>>>>,
}

/// Index of macros by name, eager or lazily materialized.
#[derive(Clone, Default)]
pub struct MacroLibrary {
    macros: BTreeMap<String, Arc<Macro>>,
    lazy: HashMap<String, LazyEntry>,
    parser: Option<Arc<dyn MacroParser>>,
}

impl fmt::Debug for MacroLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroLibrary")
            .field("macros", &self.macros.keys().collect::<Vec<_>>())
            .field("lazy", &self.lazy.keys().collect::<Vec<_>>())
            .field("has_parser", &self.parser.is_some())
            .finish()
    }
}

impl MacroLibrary {
    /// An empty library with no parser; only [`MacroLibrary::insert`] works.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parser(parser: Arc<dyn MacroParser>) -> Self {
        Self {
            parser: Some(parser),
            ..Self::default()
        }
    }

    pub fn set_parser(&mut self, parser: Arc<dyn MacroParser>) {
        self.parser = Some(parser);
    }

    /// Look a macro up by name, parsing its deferred file on first use.
    ///
    /// A lazy file that fails to parse, or that does not define the requested
    /// name, is remembered as absent and never re-parsed.
    pub fn get_macro(&self, name: &str) -> Option<Arc<Macro>> {
        if let Some(found) = self.macros.get(name) {
            return Some(found.clone());
        }

        let entry = self.lazy.get(name)?;
        entry
            .cell
            .get_or_init(|| self.materialize(name, &entry.path))
            .clone()
    }

    fn materialize(&self, name: &str, path: &Path) -> Option<Arc<Macro>> {
        let Some(parser) = &self.parser else {
            warn!(
                "Lazy macro `{}` cannot be loaded from `{}`: no macro parser attached",
                name,
                path.display()
            );
            return None;
        };

        match parser.parse(path) {
            Ok(parsed) => {
                let found = parsed
                    .into_iter()
                    .find(|m| m.name == name)
                    .map(|mut m| {
                        m.source.get_or_insert_with(|| path.to_path_buf());
                        Arc::new(m)
                    });
                if found.is_none() {
                    warn!(
                        "Lazy macro file `{}` does not define macro `{}`",
                        path.display(),
                        name
                    );
                } else {
                    debug!("Materialized lazy macro `{}` from `{}`", name, path.display());
                }
                found
            }
            Err(e) => {
                warn!("Failed to materialize lazy macro `{}`: {}", name, e);
                None
            }
        }
    }

    /// Register a macro directly, replacing any previous entry of that name.
    pub fn insert(&mut self, mac: Macro) -> Arc<Macro> {
        let mac = Arc::new(mac);
        self.lazy.remove(&mac.name);
        self.macros.insert(mac.name.clone(), mac.clone());
        mac
    }

    /// Parse `path` now and index every macro it defines.
    pub fn add_by_path(&mut self, path: impl AsRef<Path>) -> ModelResult<usize> {
        let path = path.as_ref();
        let parser = self
            .parser
            .clone()
            .ok_or_else(|| Error::MacroParserMissing(path.to_path_buf()))?;

        let parsed = parser.parse(path)?;
        let count = parsed.len();
        for mut mac in parsed {
            mac.source.get_or_insert_with(|| path.to_path_buf());
            self.insert(mac);
        }
        info!("Loaded {} macros from `{}`", count, path.display());
        Ok(count)
    }

    /// Defer parsing `path` until `name` is first queried.
    ///
    /// An eagerly loaded macro of the same name keeps precedence.
    pub fn add_lazy_by_path(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        let name = name.into();
        let path = path.into();
        debug!("Registered lazy macro `{}` from `{}`", name, path.display());
        self.lazy.insert(
            name,
            LazyEntry {
                path,
                cell: Arc::new(OnceCell::new()),
            },
        );
    }

    /// Names of every macro known to the library, eager or lazy.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.macros
            .keys()
            .chain(self.lazy.keys().filter(|name| !self.macros.contains_key(*name)))
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name) || self.lazy.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.names().count()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty() && self.lazy.is_empty()
    }
}
