//! Minimal translator plugin loaded by the host's dynamic loading tests.

use plugin_host_core::{Plugin, PluginContext};

/// Helper type without capabilities; the host must skip it.
#[derive(Default)]
pub struct SettingsPanel;

impl Plugin for SettingsPanel {
    fn init(&mut self, _context: &dyn PluginContext) {}
}

#[derive(Default)]
pub struct EchoTranslator;

impl Plugin for EchoTranslator {
    fn init(&mut self, context: &dyn PluginContext) {
        assert!(context.settings_directory().is_absolute());
    }
}

#[no_mangle]
#[allow(non_upper_case_globals)]
pub static plugin_declaration: plugin_host_core::PluginDeclaration = plugin_host_core::PluginDeclaration {
    abi_version: plugin_host_core::capability::ABI_VERSION,
    dependencies: &[],
    exports: &[
        plugin_host_core::PluginExport {
            type_name: "SettingsPanel",
            capabilities: 0,
            create: plugin_host_core::capability::create_plugin::<SettingsPanel>,
        },
        plugin_host_core::PluginExport {
            type_name: "EchoTranslator",
            capabilities: plugin_host_core::Capability::Translate.bit(),
            create: plugin_host_core::capability::create_plugin::<EchoTranslator>,
        },
    ],
};
