use plugin_host_core::capability::{create_plugin, ABI_VERSION};
use plugin_host_core::operations::DELETION_MARKER;
use plugin_host_core::{
    Capability, HostConfig, InstallError, LoadError, Plugin, PluginContext, PluginDeclaration, PluginExport,
    PluginLanguageLoader, PluginLayout, PluginManager, StaticLoader,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
pub struct DeepLTranslator;

impl Plugin for DeepLTranslator {
    fn init(&mut self, context: &dyn PluginContext) {
        assert!(context.localized_string("deepl.name").is_none());
        assert!(context.settings_directory() != context.cache_directory());
    }
}

plugin_host_core::declare_plugin! {
    DeepLTranslator => [Translate, Dictionary],
}

#[derive(Default)]
struct PaddleOcr;

impl Plugin for PaddleOcr {
    fn init(&mut self, _context: &dyn PluginContext) {}
}

static OCR_EXPORTS: [PluginExport; 1] = [PluginExport {
    type_name: "PaddleOcr",
    capabilities: Capability::Ocr.bit(),
    create: create_plugin::<PaddleOcr>,
}];

static OCR: PluginDeclaration = PluginDeclaration {
    abi_version: ABI_VERSION,
    dependencies: &[],
    exports: &OCR_EXPORTS,
};

const DEEPL_ID: &str = "d9e6c1a4-deepl";
const OCR_ID: &str = "5b1f0e2c-paddle";

struct Fixture {
    temp_dir: TempDir,
    config: HostConfig,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = HostConfig::from_data_root(temp_dir.path());
        Self { temp_dir, config }
    }

    fn manager(&self) -> PluginManager {
        let loader = StaticLoader::new()
            .with_unit("libdeepl.so", &plugin_declaration)
            .with_unit("libpaddle.so", &OCR);
        PluginManager::new(PluginLayout::new(&self.config), loader).unwrap()
    }

    fn write_plugin(&self, root: &Path, dir_name: &str, plugin_id: &str, version: &str, exe: &str) -> PathBuf {
        let dir = root.join(dir_name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("plugin.json"), descriptor(plugin_id, version, exe)).unwrap();
        fs::write(dir.join(exe), b"").unwrap();
        dir
    }

    fn package(&self, file_name: &str, plugin_id: &str, version: &str, exe: &str) -> PathBuf {
        let path = self.temp_dir.path().join(file_name);
        let file = fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("plugin.json", zip::write::FileOptions::default()).unwrap();
        zip.write_all(descriptor(plugin_id, version, exe).as_bytes()).unwrap();
        zip.start_file(exe, zip::write::FileOptions::default()).unwrap();
        zip.write_all(b"").unwrap();
        zip.finish().unwrap();
        path
    }
}

fn descriptor(plugin_id: &str, version: &str, exe: &str) -> String {
    format!(
        r#"{{
  "PluginID": "{}",
  "Name": "Plugin {}",
  "Author": "tests",
  "Version": "{}",
  "ExecuteFilePath": "{}"
}}"#,
        plugin_id, plugin_id, version, exe
    )
}

#[derive(Clone, Default)]
struct RecordingLanguages {
    seen: Arc<Mutex<Vec<PathBuf>>>,
}

impl PluginLanguageLoader for RecordingLanguages {
    fn load_plugin_languages(&self, plugin_directory: &Path) {
        self.seen.lock().unwrap().push(plugin_directory.to_path_buf());
    }
}

struct TestContext {
    settings: PathBuf,
    cache: PathBuf,
}

impl PluginContext for TestContext {
    fn settings_directory(&self) -> &Path {
        &self.settings
    }

    fn cache_directory(&self) -> &Path {
        &self.cache
    }

    fn localized_string(&self, _key: &str) -> Option<String> {
        None
    }
}

#[test]
fn test_load_all_registers_plugins_with_code_units() {
    let fixture = Fixture::new();
    let plugins = fixture.config.plugins_dir.clone();
    fixture.write_plugin(&plugins, "DeepL", DEEPL_ID, "1.0.0", "libdeepl.so");
    fixture.write_plugin(&plugins, "Paddle", OCR_ID, "0.3", "libpaddle.so");
    let missing = fixture.write_plugin(&plugins, "Gone", "gone", "1.0.0", "libgone.so");
    fs::remove_file(missing.join("libgone.so")).unwrap();
    fixture.write_plugin(&plugins, "Unknown", "unknown", "1.0.0", "libunknown.so");

    let mut manager = fixture.manager();
    let report = manager.load_all();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.failures[0].plugin_id, "unknown");
    assert!(matches!(report.failures[0].error, LoadError::Load { .. }));

    let ids: Vec<&str> = manager.plugins().into_iter().map(|entry| entry.plugin_id()).collect();
    assert_eq!(ids, vec![OCR_ID, DEEPL_ID]);

    let deepl = &manager.get(DEEPL_ID).unwrap().manifest;
    assert!(deepl.is_loaded());
    assert_eq!(deepl.assembly_name.as_deref(), Some("libdeepl"));
    assert_eq!(deepl.capability_type.as_deref(), Some("DeepLTranslator"));
    assert_eq!(deepl.kind(), "user");
    assert_eq!(
        deepl.settings_directory_path.as_deref(),
        Some(manager.layout().settings_directory(deepl).as_path())
    );
}

#[test]
fn test_newest_version_wins() {
    let fixture = Fixture::new();
    let plugins = fixture.config.plugins_dir.clone();
    fixture.write_plugin(&plugins, "DeepL_old", DEEPL_ID, "1.0.0", "libdeepl.so");
    fixture.write_plugin(&plugins, "DeepL_new", DEEPL_ID, "1.2.0", "libdeepl.so");

    let mut manager = fixture.manager();
    let report = manager.load_all();

    assert_eq!(manager.registry().len(), 1);
    let manifest = &manager.get(DEEPL_ID).unwrap().manifest;
    assert_eq!(manifest.version.to_string(), "1.2.0");
    assert_eq!(manifest.directory_name(), "DeepL_new");
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.duplicates[0].directory_name(), "DeepL_old");
}

#[test]
fn test_preinstalled_plugins_are_flagged() {
    let fixture = Fixture::new();
    let preinstalled = fixture.config.preinstalled_dir.clone();
    fixture.write_plugin(&preinstalled, "Paddle", OCR_ID, "1.0.0", "libpaddle.so");

    let mut manager = fixture.manager();
    manager.load_all();

    let manifest = &manager.get(OCR_ID).unwrap().manifest;
    assert!(manifest.is_pre_plugin);
    assert_eq!(manifest.kind(), "preinstalled");
}

#[test]
fn test_marked_and_broken_directories_are_skipped() {
    let fixture = Fixture::new();
    let plugins = fixture.config.plugins_dir.clone();
    fixture.write_plugin(&plugins, "DeepL", DEEPL_ID, "1.0.0", "libdeepl.so");
    let marked = fixture.write_plugin(&plugins, "Paddle", OCR_ID, "1.0.0", "libpaddle.so");
    fs::write(marked.join(DELETION_MARKER), "").unwrap();
    let broken = plugins.join("Broken");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join("plugin.json"), "{ not json").unwrap();

    let mut manager = fixture.manager();
    let report = manager.load_all();

    assert_eq!(report.loaded, vec![DEEPL_ID.to_string()]);
    assert!(report.failures.is_empty());
    assert!(!marked.exists());
    assert!(broken.exists());
}

#[test]
fn test_load_all_is_idempotent() {
    let fixture = Fixture::new();
    let plugins = fixture.config.plugins_dir.clone();
    fixture.write_plugin(&plugins, "DeepL", DEEPL_ID, "1.0.0", "libdeepl.so");

    let mut manager = fixture.manager();
    assert_eq!(manager.load_all().succeeded(), 1);
    let second = manager.load_all();
    assert_eq!(second.total(), 0);
    assert_eq!(manager.registry().len(), 1);
}

#[test]
fn test_capability_queries() {
    let fixture = Fixture::new();
    let plugins = fixture.config.plugins_dir.clone();
    fixture.write_plugin(&plugins, "DeepL", DEEPL_ID, "1.0.0", "libdeepl.so");
    fixture.write_plugin(&plugins, "Paddle", OCR_ID, "1.0.0", "libpaddle.so");

    let mut manager = fixture.manager();
    manager.load_all();

    let translators = manager.plugins_with(Capability::Translate);
    assert_eq!(translators.len(), 1);
    assert_eq!(translators[0].plugin_id(), DEEPL_ID);
    assert_eq!(manager.plugins_with(Capability::Dictionary).len(), 1);
    assert_eq!(manager.plugins_with(Capability::Ocr)[0].plugin_id(), OCR_ID);
    assert!(manager.plugins_with(Capability::Tts).is_empty());

    let multi = manager.plugins_matching(|entry| entry.manifest.capabilities.iter().count() > 1);
    assert_eq!(multi.len(), 1);
    assert_eq!(multi[0].manifest.capabilities.to_string(), "translate|dictionary");
}

#[test]
fn test_loaded_plugin_can_be_instantiated() {
    let fixture = Fixture::new();
    let plugins = fixture.config.plugins_dir.clone();
    fixture.write_plugin(&plugins, "DeepL", DEEPL_ID, "1.0.0", "libdeepl.so");

    let mut manager = fixture.manager();
    manager.load_all();

    let entry = manager.get(DEEPL_ID).unwrap();
    let context = TestContext {
        settings: manager.layout().settings_directory(&entry.manifest),
        cache: manager.layout().cache_directory(&entry.manifest),
    };
    let mut plugin = entry.plugin_type.instantiate();
    plugin.init(&context);
    plugin.dispose();
}

#[test]
fn test_install_from_package() {
    let fixture = Fixture::new();
    let package = fixture.package("DeepL.spkg", DEEPL_ID, "1.0.0", "libdeepl.so");
    let languages = RecordingLanguages::default();

    let mut manager = fixture.manager().with_language_loader(languages.clone());
    manager.load_all();
    let manifest = manager.install_from_package(&package).unwrap();

    let target = fixture.config.plugins_dir.join(format!("DeepL_{}", DEEPL_ID));
    assert_eq!(manifest.plugin_id, DEEPL_ID);
    assert_eq!(manifest.plugin_directory, target);
    assert!(manifest.is_loaded());
    assert!(target.join("plugin.json").is_file());
    assert!(manager.registry().contains(DEEPL_ID));
    assert_eq!(*languages.seen.lock().unwrap(), vec![target]);
    assert!(!manager.layout().staging_directory("DeepL").exists());

    manager.cleanup_temp_files();
    assert!(!fixture.config.staging_dir.exists());
}

#[test]
fn test_install_to_preinstalled_root_for_listed_ids() {
    let mut fixture = Fixture::new();
    fixture.config.preinstalled_ids = vec![OCR_ID.to_string()];
    let package = fixture.package("Paddle.spkg", OCR_ID, "1.0.0", "libpaddle.so");

    let mut manager = fixture.manager();
    let manifest = manager.install_from_package(&package).unwrap();

    assert_eq!(manifest.plugin_directory, fixture.config.preinstalled_dir.join("Paddle"));
    assert!(manifest.is_pre_plugin);
}

#[test]
fn test_duplicate_install_is_refused() {
    let fixture = Fixture::new();
    let first = fixture.package("DeepL.spkg", DEEPL_ID, "1.0.0", "libdeepl.so");
    let second = fixture.package("DeepL-next.spkg", DEEPL_ID, "2.0.0", "libdeepl.so");

    let mut manager = fixture.manager();
    manager.install_from_package(&first).unwrap();
    let installed: Vec<_> = fs::read_dir(&fixture.config.plugins_dir).unwrap().flatten().collect();

    let err = manager.install_from_package(&second).unwrap_err();
    match &err {
        InstallError::AlreadyInstalled { version, .. } => assert_eq!(version.to_string(), "1.0.0"),
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.to_string().contains("Uninstall the old version"));

    let after: Vec<_> = fs::read_dir(&fixture.config.plugins_dir).unwrap().flatten().collect();
    assert_eq!(installed.len(), after.len());
    assert_eq!(manager.registry().len(), 1);
    assert_eq!(manager.get(DEEPL_ID).unwrap().manifest.version.to_string(), "1.0.0");
    assert!(!manager.layout().staging_directory("DeepL-next").exists());
}

#[test]
fn test_install_rejects_package_without_manifest() {
    let fixture = Fixture::new();
    let path = fixture.temp_dir.path().join("Empty.spkg");
    let mut zip = zip::ZipWriter::new(fs::File::create(&path).unwrap());
    zip.start_file("readme.txt", zip::write::FileOptions::default()).unwrap();
    zip.write_all(b"no descriptor here").unwrap();
    zip.finish().unwrap();

    let mut manager = fixture.manager();
    let err = manager.install_from_package(&path).unwrap_err();

    assert!(matches!(err, InstallError::InvalidManifest(_)), "{}", err);
    assert!(manager.registry().is_empty());
    assert_eq!(fs::read_dir(&fixture.config.plugins_dir).unwrap().count(), 0);
}

#[test]
fn test_install_reports_load_failure() {
    let fixture = Fixture::new();
    let package = fixture.package("Mystery.spkg", "mystery", "1.0.0", "libmystery.so");

    let mut manager = fixture.manager();
    let err = manager.install_from_package(&package).unwrap_err();

    assert!(matches!(err, InstallError::Load { .. }), "{}", err);
    assert!(manager.registry().is_empty());
}

#[test]
fn test_uninstall_marks_and_next_start_removes() {
    let fixture = Fixture::new();
    let package = fixture.package("DeepL.spkg", DEEPL_ID, "1.0.0", "libdeepl.so");

    let mut manager = fixture.manager();
    let manifest = manager.install_from_package(&package).unwrap();
    let settings = manager.layout().settings_directory(&manifest);
    let cache = manager.layout().cache_directory(&manifest);
    fs::create_dir_all(&settings).unwrap();
    fs::create_dir_all(&cache).unwrap();

    assert!(manager.uninstall_plugin(&manifest));
    assert!(!manager.registry().contains(DEEPL_ID));
    assert!(manifest.plugin_directory.join(DELETION_MARKER).is_file());
    assert!(settings.join(DELETION_MARKER).is_file());
    assert!(cache.join(DELETION_MARKER).is_file());

    let mut restarted = fixture.manager();
    let report = restarted.load_all();

    assert_eq!(report.swept, 2);
    assert_eq!(report.total(), 0);
    assert!(restarted.registry().is_empty());
    assert!(!manifest.plugin_directory.exists());
    assert!(!settings.exists());
    assert!(!cache.exists());
}

#[test]
fn test_reinstall_waits_for_restart() {
    let fixture = Fixture::new();
    let package = fixture.package("DeepL.spkg", DEEPL_ID, "1.0.0", "libdeepl.so");

    let mut manager = fixture.manager();
    let manifest = manager.install_from_package(&package).unwrap();
    let settings = manager.layout().settings_directory(&manifest);
    fs::create_dir_all(&settings).unwrap();
    manager.uninstall_plugin(&manifest);

    let err = manager.install_from_package(&package).unwrap_err();
    assert!(matches!(err, InstallError::RestartRequired { .. }), "{}", err);
    assert!(err.to_string().contains("Restart"));
    assert!(manifest.plugin_directory.join(DELETION_MARKER).is_file());
    assert!(manager.registry().is_empty());
    assert!(!manager.layout().staging_directory("DeepL").exists());

    let mut restarted = fixture.manager();
    restarted.load_all();
    assert!(!manifest.plugin_directory.exists());
    assert!(!settings.exists());

    let reinstalled = restarted.install_from_package(&package).unwrap();
    assert_eq!(reinstalled.plugin_directory, manifest.plugin_directory);
    assert!(!reinstalled.plugin_directory.join(DELETION_MARKER).exists());
    assert_eq!(restarted.registry().len(), 1);

    let mut again = fixture.manager();
    again.load_all();
    assert_eq!(again.registry().len(), 1);
    assert!(again.get(DEEPL_ID).is_some());
}

#[test]
fn test_install_never_replaces_a_registered_directory() {
    let mut fixture = Fixture::new();
    fixture.config.preinstalled_ids = vec![OCR_ID.to_string()];
    let preinstalled = fixture.config.preinstalled_dir.clone();
    let occupied = fixture.write_plugin(&preinstalled, "Paddle", "other", "1.0.0", "libdeepl.so");
    let package = fixture.package("Paddle.spkg", OCR_ID, "1.0.0", "libpaddle.so");

    let mut manager = fixture.manager();
    manager.load_all();
    let err = manager.install_from_package(&package).unwrap_err();

    assert!(matches!(err, InstallError::Move { .. }), "{}", err);
    assert!(err.to_string().contains("other"));
    let descriptor = fs::read_to_string(occupied.join("plugin.json")).unwrap();
    assert!(descriptor.contains(r#""PluginID": "other""#));
    assert!(manager.registry().contains("other"));
    assert!(!manager.registry().contains(OCR_ID));
    assert_eq!(manager.get("other").unwrap().manifest.plugin_directory, occupied);
}

#[test]
fn test_install_replaces_unregistered_leftover() {
    let fixture = Fixture::new();
    let plugins = fixture.config.plugins_dir.clone();
    let leftover = fixture.write_plugin(
        &plugins,
        &format!("DeepL_{}", DEEPL_ID),
        DEEPL_ID,
        "0.9.0",
        "libbroken.so",
    );
    let package = fixture.package("DeepL.spkg", DEEPL_ID, "1.0.0", "libdeepl.so");

    let mut manager = fixture.manager();
    assert_eq!(manager.load_all().failed(), 1);
    let manifest = manager.install_from_package(&package).unwrap();

    assert_eq!(manifest.plugin_directory, leftover);
    assert_eq!(manifest.version.to_string(), "1.0.0");
    assert!(!leftover.join("libbroken.so").exists());
    assert!(manager.registry().contains(DEEPL_ID));
}
