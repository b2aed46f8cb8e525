use crate::ir::{Graph, NodeFlags, NodeID, NodeObj};
use smol_str::{SmolStr, format_smolstr};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default)]
pub struct GraphWriteOption {
    pub show_users: bool,
    pub show_flags: bool,
}

impl GraphWriteOption {
    pub fn loud() -> Self {
        Self { show_users: true, show_flags: true }
    }
    pub fn quiet() -> Self {
        Self::default()
    }
}

/// Renders a graph as one line per node, in slot order:
///
/// ```text
/// graph @main {
///     %0 = start
///     %3 = add %1, %2             ; [simplifiable] users: %4
/// }
/// ```
pub struct GraphWriter<'g> {
    pub graph: &'g Graph,
    pub option: GraphWriteOption,
}

impl<'g> GraphWriter<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self { graph, option: GraphWriteOption::quiet() }
    }
    pub fn with_option(graph: &'g Graph, option: GraphWriteOption) -> Self {
        Self { graph, option }
    }

    pub fn write_to(&self, out: &mut impl Write) -> std::fmt::Result {
        writeln!(out, "graph @{} {{", self.graph.name)?;
        for (id, obj) in self.graph.nodes() {
            self.write_node(out, id, obj)?;
        }
        writeln!(out, "}}")
    }

    fn write_node(&self, out: &mut impl Write, id: NodeID, obj: &NodeObj) -> std::fmt::Result {
        let mut line = format!("    {id:?} = {}", obj.opcode);
        for (i, input) in obj.inputs().iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(line, "{sep}{input:?}")?;
        }

        let mut notes = Vec::new();
        if self.option.show_flags && !obj.flags.is_empty() {
            notes.push(Self::flags_label(obj.flags));
        }
        if self.option.show_users && !obj.has_no_users() {
            let users: Vec<String> = obj.users().iter().map(|u| format!("{u:?}")).collect();
            notes.push(format_smolstr!("users: {}", users.join(", ")));
        }
        if notes.is_empty() {
            return writeln!(out, "{line}");
        }
        writeln!(out, "{line:<32}; {}", notes.join(" "))
    }

    fn flags_label(flags: NodeFlags) -> SmolStr {
        let names: Vec<&str> = flags
            .iter_names()
            .map(|(name, _)| match name {
                "SIMPLIFIABLE" => "simplifiable",
                "CONTROL" => "control",
                "FIXED" => "fixed",
                _ => "?",
            })
            .collect();
        format_smolstr!("[{}]", names.join(" "))
    }
}

impl std::fmt::Display for GraphWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.write_to(f)
    }
}
