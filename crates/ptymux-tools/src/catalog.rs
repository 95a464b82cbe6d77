//! Static table of every built-in tool.

use crate::network_tools::*;
use crate::process_tools::*;
use crate::serial_tools::*;
use crate::system_tools::*;
use crate::terminal_tools::*;
use crate::tmux_tools::*;
use ptymux_toolcore::{DiscoveryReport, Tool, ToolCategory, ToolEntry, ToolRegistry};

fn build<T: Tool + Default + 'static>() -> anyhow::Result<Box<dyn Tool>> {
    Ok(Box::new(T::default()))
}

macro_rules! entry {
    ($name:literal, $category:ident, $tool:ty) => {
        ToolEntry {
            name: $name,
            category: ToolCategory::$category,
            factory: build::<$tool>,
        }
    };
}

static BUILTIN_TOOLS: &[ToolEntry] = &[
    entry!("connect", Terminal, ConnectTool),
    entry!("bash", Terminal, BashTool),
    entry!("ssh", Terminal, SshTool),
    entry!("telnet", Terminal, TelnetTool),
    entry!("send", Terminal, SendTool),
    entry!("resize", Terminal, ResizeTool),
    entry!("clear", Terminal, ClearTool),
    entry!("disconnect", Terminal, DisconnectTool),
    entry!("spawn", Process, SpawnTool),
    entry!("send-proc", Process, SendProcTool),
    entry!("kill-proc", Process, KillProcTool),
    entry!("ssh-proc", Process, SshProcTool),
    entry!("socket-open", Network, SocketOpenTool),
    entry!("socket-write", Network, SocketWriteTool),
    entry!("socket-read", Network, SocketReadTool),
    entry!("socket-message", Network, SocketMessageTool),
    entry!("socket-close", Network, SocketCloseTool),
    entry!("socket-telnet", Network, SocketTelnetTool),
    entry!("serial-open", Serial, SerialOpenTool),
    entry!("serial-write", Serial, SerialWriteTool),
    entry!("serial-read", Serial, SerialReadTool),
    entry!("serial-message", Serial, SerialMessageTool),
    entry!("serial-close", Serial, SerialCloseTool),
    entry!("tmux-start", Tmux, TmuxStartTool),
    entry!("tmux-list", Tmux, TmuxListTool),
    entry!("tmux-send", Tmux, TmuxSendTool),
    entry!("tmux-capture", Tmux, TmuxCaptureTool),
    entry!("tmux-kill", Tmux, TmuxKillTool),
    entry!("tmux-attach", Tmux, TmuxAttachTool),
    entry!("status", System, StatusTool),
    entry!("sessions", System, SessionsTool),
    entry!("projects", System, ProjectsTool),
    entry!("activate", System, ActivateTool),
    entry!("env", System, EnvTool),
    entry!("exec", System, ExecTool),
];

pub fn builtin_tools() -> &'static [ToolEntry] {
    BUILTIN_TOOLS
}

/// Registry holding every built-in tool
pub fn builtin_registry() -> (ToolRegistry, DiscoveryReport) {
    let mut registry = ToolRegistry::new();
    let report = registry.discover_and_register(BUILTIN_TOOLS);
    (registry, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_names_match_tools() {
        for entry in builtin_tools() {
            let tool = (entry.factory)().unwrap();
            assert_eq!(tool.name(), entry.name);
            assert_eq!(tool.category(), entry.category, "{}", entry.name);
        }
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<&str> = builtin_tools().iter().map(|e| e.name).collect();
        assert_eq!(names.len(), builtin_tools().len());
    }

    #[test]
    fn test_every_category_is_populated() {
        let (registry, report) = builtin_registry();
        assert!(report.failed.is_empty());
        assert_eq!(registry.categories(), ToolCategory::ALL.to_vec());
    }
}
