//! Capability contracts shared between the host and plugin libraries.
//!
//! A plugin library exposes itself through a single exported static named
//! `plugin_declaration` (see [`declare_plugin!`]). The host never scans a
//! library for types: it reads the declaration, checks it against the host
//! ABI and picks the first export that carries at least one capability.
//!
//! Host and plugin must be compiled with the same toolchain, since
//! [`PluginExport::create`] hands a Rust trait object across the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Bumped whenever the layout of [`PluginDeclaration`] or [`Plugin`] changes.
pub const ABI_VERSION: u32 = 1;

/// Null-terminated name of the registration symbol a plugin library exports.
pub const DECLARATION_SYMBOL: &[u8] = b"plugin_declaration\0";

/// Service families a plugin can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Translate,
    Ocr,
    Tts,
    Dictionary,
    Vocabulary,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Translate,
        Capability::Ocr,
        Capability::Tts,
        Capability::Dictionary,
        Capability::Vocabulary,
    ];

    /// Bit used for this capability in [`PluginExport::capabilities`].
    pub const fn bit(self) -> u32 {
        match self {
            Capability::Translate => 1,
            Capability::Ocr => 1 << 1,
            Capability::Tts => 1 << 2,
            Capability::Dictionary => 1 << 3,
            Capability::Vocabulary => 1 << 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Translate => "translate",
            Capability::Ocr => "ocr",
            Capability::Tts => "tts",
            Capability::Dictionary => "dictionary",
            Capability::Vocabulary => "vocabulary",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of capabilities, stored as the same bitmask plugins declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    const KNOWN_BITS: u32 = Capability::Translate.bit()
        | Capability::Ocr.bit()
        | Capability::Tts.bit()
        | Capability::Dictionary.bit()
        | Capability::Vocabulary.bit();

    /// Returns `None` if `bits` contains a bit no [`Capability`] maps to.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::KNOWN_BITS != 0 {
            return None;
        }
        Some(CapabilitySet(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn with(self, capability: Capability) -> Self {
        CapabilitySet(self.0 | capability.bit())
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(CapabilitySet::EMPTY, CapabilitySet::with)
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(Capability::as_str).collect();
        f.write_str(&names.join("|"))
    }
}

/// Services the host hands to a plugin on initialization.
pub trait PluginContext {
    /// Directory the plugin may use to persist its settings.
    fn settings_directory(&self) -> &Path;
    /// Directory the plugin may use for disposable cached data.
    fn cache_directory(&self) -> &Path;
    /// Looks up a localized string by key in the host's current language.
    fn localized_string(&self, key: &str) -> Option<String>;
}

/// Base contract every plugin type implements.
///
/// The specialized service contracts (translate, OCR, TTS, dictionary,
/// vocabulary) live with the host's service layer; this crate only needs
/// the base contract and the declared [`CapabilitySet`].
pub trait Plugin: Send {
    fn init(&mut self, context: &dyn PluginContext);

    fn dispose(&mut self) {}
}

/// One plugin type exported by a library.
#[derive(Debug, Clone, Copy)]
pub struct PluginExport {
    pub type_name: &'static str,
    /// Bitmask of [`Capability::bit`] values.
    pub capabilities: u32,
    pub create: fn() -> Box<dyn Plugin>,
}

/// The registration entry point read from a loaded library.
#[derive(Debug, Clone, Copy)]
pub struct PluginDeclaration {
    pub abi_version: u32,
    /// File names (or stems) of code units that must sit next to the entry unit.
    pub dependencies: &'static [&'static str],
    pub exports: &'static [PluginExport],
}

/// Host-side copy of the [`PluginExport`] chosen for a loaded plugin.
#[derive(Debug, Clone)]
pub struct PluginType {
    pub type_name: String,
    pub capabilities: CapabilitySet,
    pub create: fn() -> Box<dyn Plugin>,
}

impl PluginType {
    /// Creates a fresh, uninitialized plugin instance.
    pub fn instantiate(&self) -> Box<dyn Plugin> {
        (self.create)()
    }
}

/// Factory used by [`declare_plugin!`].
pub fn create_plugin<T: Plugin + Default + 'static>() -> Box<dyn Plugin> {
    Box::new(T::default())
}

/// Exports the `plugin_declaration` static from a plugin library.
///
/// ```ignore
/// plugin_host_core::declare_plugin! {
///     dependencies: ["libdeepl_api"],
///     DeepLTranslator => [Translate, Dictionary],
/// }
/// ```
#[macro_export]
macro_rules! declare_plugin {
    (dependencies: [$($dep:expr),* $(,)?], $($ty:ty => [$($cap:ident),+ $(,)?]),+ $(,)?) => {
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static plugin_declaration: $crate::capability::PluginDeclaration =
            $crate::capability::PluginDeclaration {
                abi_version: $crate::capability::ABI_VERSION,
                dependencies: &[$($dep),*],
                exports: &[$(
                    $crate::capability::PluginExport {
                        type_name: stringify!($ty),
                        capabilities: 0 $(| $crate::capability::Capability::$cap.bit())+,
                        create: $crate::capability::create_plugin::<$ty>,
                    }
                ),+],
            };
    };
    ($($ty:ty => [$($cap:ident),+ $(,)?]),+ $(,)?) => {
        $crate::declare_plugin! { dependencies: [], $($ty => [$($cap),+]),+ }
    };
}
