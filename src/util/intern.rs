use std::{collections::HashMap, fmt, rc::Rc};

/// A handle to an interned identifier.
///
/// Handles are cheap to copy and compare; two handles are equal exactly when
/// the identifiers they were interned from are equal. To get the text back,
/// use [`Interner::resolve`] on the interner that produced the handle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(u32);

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

/// Deduplicating identifier storage.
///
/// Every identifier that flows through the compiler (tokens, declaration
/// tree, attributed tree, generated symbols) is interned once and referred to
/// by [`Name`] afterwards.
pub struct Interner {
    map: HashMap<Rc<str>, u32>,
    names: Vec<Rc<str>>,
}

impl Interner {
    pub fn with_capacity(capacity: usize) -> Interner {
        Interner {
            map: HashMap::with_capacity(capacity),
            names: Vec::with_capacity(capacity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Interns the provided identifier, returning its handle. Interning the
    /// same text twice returns the same handle.
    pub fn intern(&mut self, value: &str) -> Name {
        if let Some(&handle) = self.map.get(value) {
            return Name(handle);
        }
        let key: Rc<str> = Rc::from(value);
        let handle = u32::try_from(self.names.len()).expect("interner out of handles");
        self.names.push(Rc::clone(&key));
        self.map.insert(key, handle);
        Name(handle)
    }

    /// Returns the text for the provided handle. Panics if the handle was
    /// produced by a different interner.
    pub fn resolve(&self, name: Name) -> &str {
        &self.names[name.0 as usize]
    }
}

impl fmt::Debug for Interner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (i, name) in self.names.iter().enumerate() {
            map.entry(&i, name);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedupes() {
        let mut i = Interner::with_capacity(4);

        let point1 = i.intern("Point");
        let norm1 = i.intern("norm");
        let point2 = i.intern("Point");
        let norm2 = i.intern("norm");

        assert_eq!(point1, point2);
        assert_eq!(norm1, norm2);
        assert_ne!(point1, norm1);

        assert_eq!(i.resolve(point1), "Point");
        assert_eq!(i.resolve(norm2), "norm");
    }
}
