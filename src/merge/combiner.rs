//! Accumulators for entries whose content is merged across sources.

use std::collections::HashMap;

/// Prefix of service-provider listings, one combiner per distinct file.
pub const SERVICES_PREFIX: &str = "META-INF/services/";
pub const SPRING_HANDLERS: &str = "META-INF/spring.handlers";
pub const SPRING_SCHEMAS: &str = "META-INF/spring.schemas";

/// Accumulates the content of one entry path across sources and produces
/// the single entry written at the end of the merge.
pub trait EntryCombiner: Send {
    /// Append the (decompressed) content of one contributing entry.
    fn accept(&mut self, data: &[u8]);

    /// Take the accumulated content. `None` when nothing was accepted, in
    /// which case no entry is written.
    fn flush(&mut self) -> Option<Vec<u8>>;
}

/// Appends contributions back to back with no separator.
#[derive(Debug, Default)]
pub struct Concatenator {
    buffer: Vec<u8>,
}

impl Concatenator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryCombiner for Concatenator {
    fn accept(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }
}

/// Joins contributions as lines: a contribution missing its final newline
/// gets one before the next contribution and at flush.
#[derive(Debug, Default)]
pub struct LineConcatenator {
    buffer: Vec<u8>,
}

impl LineConcatenator {
    pub fn new() -> Self {
        Self::default()
    }

    fn terminate_line(&mut self) {
        if !self.buffer.is_empty() && !self.buffer.ends_with(b"\n") {
            self.buffer.push(b'\n');
        }
    }
}

impl EntryCombiner for LineConcatenator {
    fn accept(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.terminate_line();
        self.buffer.extend_from_slice(data);
    }

    fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        self.terminate_line();
        Some(std::mem::take(&mut self.buffer))
    }
}

/// Fixed mapping from entry path to the combiner that owns it, for one run.
///
/// Service-provider files get a [`LineConcatenator`] the first time their
/// path is seen. Combiners flush in the order they were registered.
pub struct CombinerRegistry {
    combiners: Vec<(String, Box<dyn EntryCombiner>)>,
    index: HashMap<String, usize>,
}

impl CombinerRegistry {
    /// A registry without any combiners, not even the built-in ones.
    pub fn empty() -> Self {
        Self {
            combiners: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// A registry with the Spring handler and schema combiners.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(SPRING_HANDLERS, Box::new(Concatenator::new()));
        registry.register(SPRING_SCHEMAS, Box::new(Concatenator::new()));
        registry
    }

    /// Make `combiner` the owner of `path`, returning the previous owner.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        combiner: Box<dyn EntryCombiner>,
    ) -> Option<Box<dyn EntryCombiner>> {
        let path = path.into();
        match self.index.get(&path) {
            Some(&slot) => Some(std::mem::replace(&mut self.combiners[slot].1, combiner)),
            None => {
                self.index.insert(path.clone(), self.combiners.len());
                self.combiners.push((path, combiner));
                None
            }
        }
    }

    /// Whether entries at `path` go to a combiner.
    pub fn owns(&self, path: &str) -> bool {
        self.index.contains_key(path) || is_service_file(path)
    }

    /// Feed `data` to the owner of `path`. Returns `false` if no combiner
    /// owns it.
    pub fn accept(&mut self, path: &str, data: &[u8]) -> bool {
        let slot = match self.index.get(path) {
            Some(&slot) => slot,
            None if is_service_file(path) => {
                self.register(path, Box::new(LineConcatenator::new()));
                self.combiners.len() - 1
            }
            None => return false,
        };
        self.combiners[slot].1.accept(data);
        true
    }

    /// Flush every combiner, in registration order, skipping empty ones.
    pub fn flush_all(&mut self) -> Vec<(String, Vec<u8>)> {
        self.combiners
            .iter_mut()
            .filter_map(|(path, combiner)| combiner.flush().map(|data| (path.clone(), data)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.combiners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combiners.is_empty()
    }
}

impl Default for CombinerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn is_service_file(path: &str) -> bool {
    path.len() > SERVICES_PREFIX.len() && path.starts_with(SERVICES_PREFIX) && !path.ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenator_appends_raw_bytes() {
        let mut c = Concatenator::new();
        c.accept(b"handler1");
        c.accept(b"handler2\n");
        assert_eq!(c.flush().unwrap(), b"handler1handler2\n");
        assert_eq!(c.flush(), None);
    }

    #[test]
    fn line_concatenator_supplies_missing_newlines() {
        let mut c = LineConcatenator::new();
        c.accept(b"my.Impl1");
        c.accept(b"my.Impl2\n");
        c.accept(b"my.Impl3");
        assert_eq!(c.flush().unwrap(), b"my.Impl1\nmy.Impl2\nmy.Impl3\n");
    }

    #[test]
    fn line_concatenator_keeps_terminated_input_as_is() {
        let mut c = LineConcatenator::new();
        c.accept(b"a\nb\n");
        c.accept(b"c\n");
        assert_eq!(c.flush().unwrap(), b"a\nb\nc\n");
    }

    #[test]
    fn empty_combiners_do_not_flush() {
        assert_eq!(Concatenator::new().flush(), None);
        assert_eq!(LineConcatenator::new().flush(), None);
        let mut c = Concatenator::new();
        c.accept(b"");
        assert_eq!(c.flush(), None);
    }

    #[test]
    fn registry_creates_service_combiners_on_demand() {
        let mut registry = CombinerRegistry::with_builtins();
        assert!(registry.owns("META-INF/services/spi.DateProvider"));
        assert!(!registry.owns("META-INF/services/"));
        assert!(!registry.owns("META-INF/MANIFEST.MF"));

        assert!(registry.accept("META-INF/services/spi.DateProvider", b"my.DateProviderImpl1\n"));
        assert!(registry.accept(SPRING_HANDLERS, b"handler1\n"));
        assert!(registry.accept("META-INF/services/spi.DateProvider", b"my.DateProviderImpl2\n"));
        assert!(!registry.accept("com/x/Y.class", b""));

        let flushed = registry.flush_all();
        assert_eq!(
            flushed,
            vec![
                (SPRING_HANDLERS.to_string(), b"handler1\n".to_vec()),
                (
                    "META-INF/services/spi.DateProvider".to_string(),
                    b"my.DateProviderImpl1\nmy.DateProviderImpl2\n".to_vec()
                ),
            ]
        );
    }

    #[test]
    fn register_replaces_in_place() {
        let mut registry = CombinerRegistry::empty();
        assert!(registry.register("a", Box::new(Concatenator::new())).is_none());
        assert!(registry.register("b", Box::new(Concatenator::new())).is_none());
        assert!(registry.register("a", Box::new(LineConcatenator::new())).is_some());
        assert_eq!(registry.len(), 2);
        registry.accept("a", b"x");
        registry.accept("b", b"y");
        let paths: Vec<_> = registry.flush_all().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, ["a", "b"]);
    }
}
