/// The transport a given [`Endpoint`] is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Pcie,
    Eth,
}

/// A named, openable hardware reference.
///
/// All I/O through an [`crate::Llio`] fails unless its endpoint is opened.
#[derive(Debug, Clone)]
pub struct Endpoint {
    kind: TransportKind,
    name: String,
    opened: bool,
}

impl Endpoint {
    pub fn new(kind: TransportKind, name: impl Into<String>) -> Self {
        Endpoint {
            kind,
            name: name.into(),
            opened: false,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opened(&self) -> bool {
        self.opened
    }

    pub(crate) fn set_opened(&mut self, opened: bool) {
        self.opened = opened;
    }
}
