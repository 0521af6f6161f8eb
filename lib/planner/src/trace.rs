/// Accumulator for the human-readable optimizer trace: the input join
/// tree, pushdown results, the hypergraph in graphviz form, selectivities,
/// simplification steps, the order state machines, the enumeration log and
/// the final plan tree. When disabled, everything appended is dropped.
#[derive(Debug, Default)]
pub struct OptimizerTrace {
    buf: Option<String>,
}

impl OptimizerTrace {
    pub fn enabled() -> Self {
        Self { buf: Some(String::new()) }
    }

    pub fn disabled() -> Self {
        Self { buf: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.buf.is_some()
    }

    pub fn append(&mut self, text: impl AsRef<str>) {
        if let Some(buf) = &mut self.buf {
            buf.push_str(text.as_ref());
        }
    }

    /// Direct access to the underlying buffer, e.g. for handing to
    /// subsystems that append their own sections.
    pub fn buffer(&mut self) -> Option<&mut String> {
        self.buf.as_mut()
    }

    pub fn finish(self) -> Option<String> {
        self.buf
    }
}
