use super::{
    collect::Collect, FileRef, JobTemplate, LoadOptions, OutputSinks, TemplateError,
    TemplateLoader,
};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    io::ErrorKind,
    path::Path,
};
use tracing::{debug, info, instrument, warn};

/// service type whose file is a cumulative histogram output
pub const AGGREGATING_SINK: &str = "TFileService";
/// module type writing events during processing
pub const STREAMING_SINK: &str = "PoolOutputModule";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Document {
    pub process: Process,
    #[serde(flatten)]
    pub rest: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(default)]
    pub source: Source,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Module>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub output_modules: BTreeMap<String, Module>,
    #[serde(flatten)]
    pub rest: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub file_names: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_file_names: Vec<FileRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect: Option<Collect>,
    #[serde(flatten)]
    pub rest: BTreeMap<String, Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<FileRef>,
    #[serde(flatten)]
    pub rest: BTreeMap<String, Value>,
}

/// A process description stored as YAML
#[derive(Clone, Debug, PartialEq)]
pub struct YamlTemplate {
    document: Document,
}

impl YamlTemplate {
    /// parse a template from text, `origin` is only used for error reporting
    pub fn parse(text: &str, origin: &Path) -> Result<Self, TemplateError> {
        let value: Value = serde_yaml::from_str(text)?;

        if value.get("process").map_or(true, Value::is_null) {
            return Err(TemplateError::ProcessSymbolMissing(origin.to_path_buf()));
        }

        let mut document: Document = serde_yaml::from_value(value)?;

        // resolve collected inputs once so every dump is self-contained
        if let Some(collect) = document.process.source.collect.take() {
            let collected = collect.files()?;

            if collected.is_empty() {
                warn!(glob = %collect.glob, "Input collection matched no files");
            }

            document.process.source.file_names.extend(collected);
        }

        Ok(Self { document })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    fn sinks_of(modules: &BTreeMap<String, Module>, kind: &str) -> BTreeMap<String, FileRef> {
        modules
            .iter()
            .filter(|(_, module)| module.kind == kind)
            .filter_map(|(name, module)| {
                module
                    .file_name
                    .as_ref()
                    .map(|file| (name.clone(), file.clone()))
            })
            .collect()
    }

    fn rename_sinks(
        modules: &mut BTreeMap<String, Module>,
        renames: &BTreeMap<String, FileRef>,
    ) -> Result<(), TemplateError> {
        for (name, file) in renames {
            match modules.get_mut(name) {
                Some(module) => module.file_name = Some(file.clone()),
                None => return Err(TemplateError::UnknownSink(name.clone())),
            }
        }

        Ok(())
    }
}

impl JobTemplate for YamlTemplate {
    fn input_files(&self) -> Result<Vec<FileRef>, TemplateError> {
        let source = &self.document.process.source;

        if !source.secondary_file_names.is_empty() {
            return Err(TemplateError::UnsupportedSecondaryInputs(
                source.secondary_file_names.len(),
            ));
        }

        Ok(source.file_names.clone())
    }

    fn output_sinks(&self) -> OutputSinks {
        OutputSinks {
            aggregating: Self::sinks_of(&self.document.process.services, AGGREGATING_SINK),
            streaming: Self::sinks_of(&self.document.process.output_modules, STREAMING_SINK),
        }
    }

    fn dump(&self) -> Result<String, TemplateError> {
        Ok(serde_yaml::to_string(&self.document)?)
    }

    fn rematerialize(
        &self,
        inputs: &[FileRef],
        sinks: &OutputSinks,
    ) -> Result<String, TemplateError> {
        let mut document = self.document.clone();
        let process = &mut document.process;

        process.source.file_names = inputs.to_vec();
        Self::rename_sinks(&mut process.services, &sinks.aggregating)?;
        Self::rename_sinks(&mut process.output_modules, &sinks.streaming)?;

        Ok(serde_yaml::to_string(&document)?)
    }
}

/// Loads `YamlTemplate`s from disk, applying `key=value` arguments to `${key}` placeholders
#[derive(Clone, Copy, Debug, Default)]
pub struct YamlLoader;

impl TemplateLoader for YamlLoader {
    type Template = YamlTemplate;

    #[instrument(skip(self, options), level = "info")]
    fn load(&self, path: &Path, options: &LoadOptions) -> Result<YamlTemplate, TemplateError> {
        let substitutions = options.substitutions()?;
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(TemplateError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let (text, used) = substitute(&text, &substitutions);

        for key in substitutions.keys().filter(|key| !used.contains(key.as_str())) {
            warn!("Template argument {key} is not used by {}", path.display());
        }

        info!("Loading job template");
        let template = YamlTemplate::parse(&text, path)?;
        debug!(
            inputs = template.document.process.source.file_names.len(),
            sinks = template.output_sinks().len(),
            "Template loading completed"
        );

        Ok(template)
    }
}

/// Replace `${key}` placeholders in one left to right pass.
/// Inserted values are never scanned again and unknown placeholders stay as they are.
fn substitute<'a>(
    text: &str,
    substitutions: &'a BTreeMap<String, String>,
) -> (String, BTreeSet<&'a str>) {
    let mut result = String::with_capacity(text.len());
    let mut used = BTreeSet::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        let (before, placeholder) = rest.split_at(start);
        result.push_str(before);

        let Some(end) = placeholder.find('}') else {
            rest = placeholder;
            break;
        };

        match substitutions.get_key_value(&placeholder[2..end]) {
            Some((key, value)) => {
                result.push_str(value);
                used.insert(key.as_str());
            }
            None => result.push_str(&placeholder[..=end]),
        }

        rest = &placeholder[end + 1..];
    }

    result.push_str(rest);

    (result, used)
}
