//! OCR plugin that needs a vendor library shipped next to it.

use plugin_host_core::{Plugin, PluginContext};

#[derive(Default)]
pub struct VendorOcr;

impl Plugin for VendorOcr {
    fn init(&mut self, _context: &dyn PluginContext) {}
}

plugin_host_core::declare_plugin! {
    dependencies: ["libvendor_sdk"],
    VendorOcr => [Ocr],
}
