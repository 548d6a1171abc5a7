// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `.treeinfo` file format.

An INI document describing a distribution tree. Both the productmd layout
(`[header]`, `[release]`, `[tree]`) and the legacy `[general]` layout are understood.
*/

use {
    crate::{
        content::DistributionTree,
        error::{MirrorError, Result},
    },
    std::{collections::BTreeMap, io::BufRead},
};

const FILE: &str = ".treeinfo";

type Sections = BTreeMap<String, BTreeMap<String, String>>;

fn parse_sections(reader: impl BufRead) -> Result<Sections> {
    let mut sections = Sections::new();
    let mut current: Option<String> = None;

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            MirrorError::parse(FILE, format!("line {}", index + 1), "expected key = value")
        })?;

        let section = current.as_ref().ok_or_else(|| {
            MirrorError::parse(FILE, format!("line {}", index + 1), "key outside of section")
        })?;

        sections
            .entry(section.clone())
            .or_default()
            .insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(sections)
}

fn get(sections: &Sections, section: &str, key: &str) -> Option<String> {
    sections.get(section).and_then(|s| s.get(key)).cloned()
}

/// Parse a `.treeinfo` document.
pub fn parse_treeinfo(reader: impl BufRead) -> Result<DistributionTree> {
    let sections = parse_sections(reader)?;

    let tree = if sections.contains_key("header") {
        DistributionTree {
            header_version: get(&sections, "header", "version").unwrap_or_default(),
            release_name: get(&sections, "release", "name").unwrap_or_default(),
            release_short: get(&sections, "release", "short").unwrap_or_default(),
            release_version: get(&sections, "release", "version").unwrap_or_default(),
            arch: get(&sections, "tree", "arch")
                .ok_or_else(|| MirrorError::parse(FILE, "tree", "missing arch"))?,
            build_timestamp: get(&sections, "tree", "build_timestamp").unwrap_or_default(),
            sections: BTreeMap::new(),
        }
    } else if sections.contains_key("general") {
        let family = get(&sections, "general", "family").unwrap_or_default();

        DistributionTree {
            header_version: "1.0".to_string(),
            release_short: family.clone(),
            release_name: family,
            release_version: get(&sections, "general", "version").unwrap_or_default(),
            arch: get(&sections, "general", "arch")
                .ok_or_else(|| MirrorError::parse(FILE, "general", "missing arch"))?,
            build_timestamp: get(&sections, "general", "timestamp").unwrap_or_default(),
            sections: BTreeMap::new(),
        }
    } else {
        return Err(MirrorError::parse(
            FILE,
            "header",
            "neither [header] nor [general] present",
        ));
    };

    Ok(DistributionTree { sections, ..tree })
}

/// Render a distribution tree as `.treeinfo`.
///
/// Sections and keys are written in sorted order.
pub fn render(tree: &DistributionTree) -> String {
    let mut out = String::new();

    for (index, (name, entries)) in tree.sections.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        out.push_str(&format!("[{}]\n", name));
        for (key, value) in entries {
            out.push_str(&format!("{} = {}\n", key, value));
        }
    }

    out
}
