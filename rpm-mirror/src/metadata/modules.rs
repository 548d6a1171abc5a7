// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `modules.yaml` file format.

The file is a stream of YAML documents. `modulemd` and `modulemd-defaults` documents
become content units; other document kinds are ignored. Each unit keeps its document
in canonical YAML so it can be republished verbatim.
*/

use {
    crate::{
        content::{ContentUnit, Modulemd, ModulemdDefaults},
        error::{MirrorError, Result},
    },
    serde::Deserialize,
    serde_yaml::Value,
    std::{collections::BTreeMap, io::Read},
};

const FILE: &str = "modules.yaml";

/// Render a scalar as a string.
///
/// Stream names like `0` arrive as numbers.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn field(data: &Value, name: &str) -> Option<String> {
    data.get(name).and_then(scalar)
}

fn required_field(data: &Value, document: &str, name: &str) -> Result<String> {
    field(data, name).ok_or_else(|| MirrorError::parse(FILE, document, format!("missing {}", name)))
}

fn parse_modulemd(data: &Value, document: String) -> Result<Modulemd> {
    let version = match data.get("version") {
        None => 0,
        Some(v) => scalar(v)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| MirrorError::parse(FILE, "modulemd", "invalid version"))?,
    };

    let artifacts = data
        .get("artifacts")
        .and_then(|a| a.get("rpms"))
        .and_then(Value::as_sequence)
        .map(|rpms| rpms.iter().filter_map(scalar).collect::<Vec<_>>())
        .unwrap_or_default();

    Ok(Modulemd {
        name: required_field(data, "modulemd", "name")?,
        stream: required_field(data, "modulemd", "stream")?,
        version,
        context: field(data, "context").unwrap_or_default(),
        arch: field(data, "arch").unwrap_or_else(|| "noarch".to_string()),
        artifacts,
        document,
    })
}

fn parse_defaults(data: &Value, document: String) -> Result<ModulemdDefaults> {
    let mut profiles = BTreeMap::new();

    if let Some(mapping) = data.get("profiles").and_then(Value::as_mapping) {
        for (stream, names) in mapping.iter() {
            let stream = scalar(stream).ok_or_else(|| {
                MirrorError::parse(FILE, "modulemd-defaults", "invalid profile stream")
            })?;
            let names = names
                .as_sequence()
                .map(|s| s.iter().filter_map(scalar).collect::<Vec<_>>())
                .unwrap_or_default();

            profiles.insert(stream, names);
        }
    }

    Ok(ModulemdDefaults {
        module: required_field(data, "modulemd-defaults", "module")?,
        stream: field(data, "stream"),
        profiles,
        document,
    })
}

/// Parse every module document of a `modules.yaml` stream.
pub fn parse_modules(mut reader: impl Read) -> Result<Vec<ContentUnit>> {
    let mut source = String::new();
    reader.read_to_string(&mut source)?;

    let mut units = vec![];

    for document in serde_yaml::Deserializer::from_str(&source) {
        let value =
            Value::deserialize(document).map_err(|e| MirrorError::parse(FILE, "document", e))?;

        if value.is_null() {
            continue;
        }

        let kind = value
            .get("document")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let data = value
            .get("data")
            .cloned()
            .unwrap_or(Value::Null);

        let canonical =
            serde_yaml::to_string(&value).map_err(|e| MirrorError::parse(FILE, &kind, e))?;

        match kind.as_str() {
            "modulemd" => units.push(ContentUnit::Modulemd(parse_modulemd(&data, canonical)?)),
            "modulemd-defaults" => units.push(ContentUnit::ModulemdDefaults(parse_defaults(
                &data, canonical,
            )?)),
            _ => {
                log::debug!("ignoring {} document of kind {:?}", FILE, kind);
            }
        }
    }

    Ok(units)
}

/// Render one document with its YAML stream markers.
pub fn render_document(document: &str) -> String {
    let mut out = String::from("---\n");
    out.push_str(document);
    if !document.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("...\n");

    out
}

/// Render a `modules.yaml` stream from module units, in the order given.
pub fn render(units: &[&ContentUnit]) -> String {
    units
        .iter()
        .filter_map(|unit| match unit {
            ContentUnit::Modulemd(m) => Some(render_document(&m.document)),
            ContentUnit::ModulemdDefaults(d) => Some(render_document(&d.document)),
            _ => None,
        })
        .collect()
}
