// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `comps.xml` file format. */

use {
    crate::{
        content::{
            ContentUnit, EnvironmentOption, GroupPackage, LangpackMatch, PackageCategory,
            PackageEnvironment, PackageGroup, PackageLangpacks, Translations,
        },
        error::Result,
        metadata::xml::{parse_bool, XmlReader, XmlWriter},
    },
    quick_xml::events::BytesStart,
    std::io::BufRead,
};

const FILE: &str = "comps.xml";

const DOCTYPE: &str =
    "<!DOCTYPE comps PUBLIC \"-//Red Hat, Inc.//DTD Comps info//EN\" \"comps.dtd\">";

/// Streaming reader of the entries of a `comps.xml` document.
///
/// Yields [ContentUnit::PackageGroup], [ContentUnit::PackageCategory],
/// [ContentUnit::PackageEnvironment] and [ContentUnit::PackageLangpacks].
pub struct CompsReader<R: BufRead> {
    xml: XmlReader<R>,
    in_comps: bool,
    done: bool,
}

impl<R: BufRead> CompsReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            xml: XmlReader::new(source, FILE),
            in_comps: false,
            done: false,
        }
    }

    fn next_unit(&mut self) -> Result<Option<ContentUnit>> {
        if !self.in_comps {
            match self.xml.find(b"comps")? {
                Some((_, false)) => self.in_comps = true,
                _ => return Ok(None),
            }
        }

        while let Some((e, empty)) = self.xml.next_child(b"comps")? {
            if empty {
                continue;
            }

            match e.local_name().as_ref() {
                b"group" => return Ok(Some(ContentUnit::PackageGroup(self.read_group()?))),
                b"category" => {
                    return Ok(Some(ContentUnit::PackageCategory(self.read_category()?)))
                }
                b"environment" => {
                    return Ok(Some(ContentUnit::PackageEnvironment(
                        self.read_environment()?,
                    )))
                }
                b"langpacks" => {
                    return Ok(Some(ContentUnit::PackageLangpacks(self.read_langpacks()?)))
                }
                _ => self.xml.finish(empty)?,
            }
        }

        Ok(None)
    }

    /// Handle the elements shared by groups, categories and environments.
    ///
    /// Returns false if the element is not one of them.
    fn read_common(
        &mut self,
        e: &BytesStart,
        empty: bool,
        id: &mut String,
        name: &mut String,
        description: &mut String,
        name_by_lang: &mut Translations,
        desc_by_lang: &mut Translations,
        display_order: &mut Option<u32>,
    ) -> Result<bool> {
        match e.local_name().as_ref() {
            b"id" => *id = self.xml.text(empty)?,
            b"name" => match self.xml.attr(e, b"lang")? {
                Some(lang) => {
                    name_by_lang.insert(lang, self.xml.text(empty)?);
                }
                None => *name = self.xml.text(empty)?,
            },
            b"description" => match self.xml.attr(e, b"lang")? {
                Some(lang) => {
                    desc_by_lang.insert(lang, self.xml.text(empty)?);
                }
                None => *description = self.xml.text(empty)?,
            },
            b"display_order" => {
                let value = self.xml.text(empty)?;
                *display_order = Some(value.trim().parse().map_err(|err| {
                    self.xml
                        .error("display_order", format!("{:?}: {}", value, err))
                })?);
            }
            _ => return Ok(false),
        }

        Ok(true)
    }

    fn read_group_ids(&mut self, parent: &[u8]) -> Result<Vec<EnvironmentOption>> {
        let mut ids = vec![];

        while let Some((e, empty)) = self.xml.next_child(parent)? {
            if e.local_name().as_ref() == b"groupid" {
                let default = self
                    .xml
                    .attr(&e, b"default")?
                    .map(|v| parse_bool(&v))
                    .unwrap_or(false);

                ids.push(EnvironmentOption {
                    group_id: self.xml.text(empty)?,
                    default,
                });
            } else {
                self.xml.finish(empty)?;
            }
        }

        Ok(ids)
    }

    fn read_group(&mut self) -> Result<PackageGroup> {
        let mut g = PackageGroup {
            user_visible: true,
            ..Default::default()
        };

        while let Some((e, empty)) = self.xml.next_child(b"group")? {
            if self.read_common(
                &e,
                empty,
                &mut g.id,
                &mut g.name,
                &mut g.description,
                &mut g.name_by_lang,
                &mut g.desc_by_lang,
                &mut g.display_order,
            )? {
                continue;
            }

            match e.local_name().as_ref() {
                b"default" => g.default = parse_bool(&self.xml.text(empty)?),
                b"uservisible" => g.user_visible = parse_bool(&self.xml.text(empty)?),
                b"biarchonly" => g.biarch_only = parse_bool(&self.xml.text(empty)?),
                b"langonly" => g.langonly = Some(self.xml.text(empty)?),
                b"packagelist" if !empty => {
                    while let Some((p, empty)) = self.xml.next_child(b"packagelist")? {
                        if p.local_name().as_ref() != b"packagereq" {
                            self.xml.finish(empty)?;
                            continue;
                        }

                        let package_type = self
                            .xml
                            .attr(&p, b"type")?
                            .unwrap_or_else(|| "mandatory".to_string());
                        let requires = self.xml.attr(&p, b"requires")?;
                        let basearchonly = self
                            .xml
                            .attr(&p, b"basearchonly")?
                            .map(|v| parse_bool(&v))
                            .unwrap_or(false);

                        g.packages.push(GroupPackage {
                            name: self.xml.text(empty)?,
                            package_type,
                            requires,
                            basearchonly,
                        });
                    }
                }
                _ => self.xml.finish(empty)?,
            }
        }

        if g.id.is_empty() {
            return Err(self.xml.error("group", "group has no id"));
        }

        Ok(g)
    }

    fn read_category(&mut self) -> Result<PackageCategory> {
        let mut c = PackageCategory::default();

        while let Some((e, empty)) = self.xml.next_child(b"category")? {
            if self.read_common(
                &e,
                empty,
                &mut c.id,
                &mut c.name,
                &mut c.description,
                &mut c.name_by_lang,
                &mut c.desc_by_lang,
                &mut c.display_order,
            )? {
                continue;
            }

            match e.local_name().as_ref() {
                b"grouplist" if !empty => {
                    c.group_ids = self
                        .read_group_ids(b"grouplist")?
                        .into_iter()
                        .map(|o| o.group_id)
                        .collect();
                }
                _ => self.xml.finish(empty)?,
            }
        }

        if c.id.is_empty() {
            return Err(self.xml.error("category", "category has no id"));
        }

        Ok(c)
    }

    fn read_environment(&mut self) -> Result<PackageEnvironment> {
        let mut env = PackageEnvironment::default();

        while let Some((e, empty)) = self.xml.next_child(b"environment")? {
            if self.read_common(
                &e,
                empty,
                &mut env.id,
                &mut env.name,
                &mut env.description,
                &mut env.name_by_lang,
                &mut env.desc_by_lang,
                &mut env.display_order,
            )? {
                continue;
            }

            match e.local_name().as_ref() {
                b"grouplist" if !empty => {
                    env.group_ids = self
                        .read_group_ids(b"grouplist")?
                        .into_iter()
                        .map(|o| o.group_id)
                        .collect();
                }
                b"optionlist" if !empty => env.options = self.read_group_ids(b"optionlist")?,
                _ => self.xml.finish(empty)?,
            }
        }

        if env.id.is_empty() {
            return Err(self.xml.error("environment", "environment has no id"));
        }

        Ok(env)
    }

    fn read_langpacks(&mut self) -> Result<PackageLangpacks> {
        let mut langpacks = PackageLangpacks::default();

        while let Some((e, empty)) = self.xml.next_child(b"langpacks")? {
            if e.local_name().as_ref() == b"match" {
                langpacks.matches.push(LangpackMatch {
                    name: self.xml.required_attr(&e, b"name")?,
                    install: self.xml.required_attr(&e, b"install")?,
                });
            }
            self.xml.finish(empty)?;
        }

        Ok(langpacks)
    }
}

impl<R: BufRead> Iterator for CompsReader<R> {
    type Item = Result<ContentUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_unit() {
            Ok(Some(v)) => Some(Ok(v)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn write_common(
    w: &mut XmlWriter,
    id: &str,
    name: &str,
    description: &str,
    name_by_lang: &Translations,
    desc_by_lang: &Translations,
) {
    w.text("id", &[], id);
    w.text("name", &[], name);
    for (lang, value) in name_by_lang {
        w.text("name", &[("xml:lang", lang)], value);
    }
    w.text("description", &[], description);
    for (lang, value) in desc_by_lang {
        w.text("description", &[("xml:lang", lang)], value);
    }
}

fn write_display_order(w: &mut XmlWriter, display_order: Option<u32>) {
    if let Some(order) = display_order {
        w.text("display_order", &[], &order.to_string());
    }
}

fn write_grouplist(w: &mut XmlWriter, ids: &[String]) {
    w.start("grouplist", &[]);
    for id in ids {
        w.text("groupid", &[], id);
    }
    w.end("grouplist");
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn write_group(w: &mut XmlWriter, g: &PackageGroup) {
    w.start("group", &[]);
    write_common(
        w,
        &g.id,
        &g.name,
        &g.description,
        &g.name_by_lang,
        &g.desc_by_lang,
    );
    w.text("default", &[], bool_text(g.default));
    w.text("uservisible", &[], bool_text(g.user_visible));
    w.text("biarchonly", &[], bool_text(g.biarch_only));
    write_display_order(w, g.display_order);
    w.optional_text("langonly", g.langonly.as_deref());
    w.start("packagelist", &[]);
    for p in &g.packages {
        let mut attrs = vec![("type", p.package_type.as_str())];
        if let Some(requires) = &p.requires {
            attrs.push(("requires", requires.as_str()));
        }
        if p.basearchonly {
            attrs.push(("basearchonly", "true"));
        }
        w.text("packagereq", &attrs, &p.name);
    }
    w.end("packagelist");
    w.end("group");
}

fn write_category(w: &mut XmlWriter, c: &PackageCategory) {
    w.start("category", &[]);
    write_common(
        w,
        &c.id,
        &c.name,
        &c.description,
        &c.name_by_lang,
        &c.desc_by_lang,
    );
    write_display_order(w, c.display_order);
    write_grouplist(w, &c.group_ids);
    w.end("category");
}

fn write_environment(w: &mut XmlWriter, env: &PackageEnvironment) {
    w.start("environment", &[]);
    write_common(
        w,
        &env.id,
        &env.name,
        &env.description,
        &env.name_by_lang,
        &env.desc_by_lang,
    );
    write_display_order(w, env.display_order);
    write_grouplist(w, &env.group_ids);
    w.start("optionlist", &[]);
    for option in &env.options {
        if option.default {
            w.text("groupid", &[("default", "true")], &option.group_id);
        } else {
            w.text("groupid", &[], &option.group_id);
        }
    }
    w.end("optionlist");
    w.end("environment");
}

fn write_langpacks(w: &mut XmlWriter, langpacks: &PackageLangpacks) {
    w.start("langpacks", &[]);
    for m in &langpacks.matches {
        w.empty("match", &[("name", &m.name), ("install", &m.install)]);
    }
    w.end("langpacks");
}

pub fn render_group(g: &PackageGroup) -> String {
    let mut w = XmlWriter::fragment();
    write_group(&mut w, g);
    w.finish()
}

pub fn render_category(c: &PackageCategory) -> String {
    let mut w = XmlWriter::fragment();
    write_category(&mut w, c);
    w.finish()
}

pub fn render_environment(env: &PackageEnvironment) -> String {
    let mut w = XmlWriter::fragment();
    write_environment(&mut w, env);
    w.finish()
}

pub fn render_langpacks(langpacks: &PackageLangpacks) -> String {
    let mut w = XmlWriter::fragment();
    write_langpacks(&mut w, langpacks);
    w.finish()
}

/// Render a `comps.xml` document from comps units, in the order given.
///
/// Units of other kinds are ignored.
pub fn render(units: &[&ContentUnit]) -> String {
    let mut w = XmlWriter::new();
    w.raw_line(DOCTYPE);
    w.start("comps", &[]);

    for unit in units {
        match unit {
            ContentUnit::PackageGroup(g) => write_group(&mut w, g),
            ContentUnit::PackageCategory(c) => write_category(&mut w, c),
            ContentUnit::PackageEnvironment(env) => write_environment(&mut w, env),
            ContentUnit::PackageLangpacks(l) => write_langpacks(&mut w, l),
            _ => {}
        }
    }

    w.end("comps");
    w.finish()
}

#[cfg(test)]
mod test {
    use {super::*, crate::content::ContentKind};

    const COMPS_XML: &str = include_str!("../../testdata/comps.xml");

    fn parse(xml: &str) -> Result<Vec<ContentUnit>> {
        CompsReader::new(xml.as_bytes()).collect()
    }

    #[test]
    fn parse_entries() -> Result<()> {
        let units = parse(COMPS_XML)?;

        assert_eq!(
            units.iter().map(|u| u.kind()).collect::<Vec<_>>(),
            vec![
                ContentKind::PackageGroup,
                ContentKind::PackageGroup,
                ContentKind::PackageCategory,
                ContentKind::PackageEnvironment,
                ContentKind::PackageLangpacks,
            ]
        );

        match &units[0] {
            ContentUnit::PackageGroup(g) => {
                assert_eq!(g.id, "bird");
                assert_eq!(g.name_by_lang.get("de").map(|s| s.as_str()), Some("Vogel"));
                assert!(g.user_visible);
                assert!(!g.default);
                assert_eq!(g.display_order, Some(1024));
                assert_eq!(g.packages.len(), 2);
                assert_eq!(g.packages[1].package_type, "optional");
                assert_eq!(g.packages[1].requires.as_deref(), Some("bear"));
            }
            other => panic!("unexpected unit: {:?}", other),
        }

        match &units[3] {
            ContentUnit::PackageEnvironment(env) => {
                assert_eq!(env.group_ids, vec!["bird".to_string()]);
                assert_eq!(env.options.len(), 1);
                assert!(env.options[0].default);
            }
            other => panic!("unexpected unit: {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn render_then_parse() -> Result<()> {
        let units = parse(COMPS_XML)?;
        let refs = units.iter().collect::<Vec<_>>();

        let xml = render(&refs);
        assert!(xml.contains("<!DOCTYPE comps"));
        assert_eq!(parse(&xml)?, units);

        Ok(())
    }

    #[test]
    fn bad_display_order() {
        let xml = "<comps><group><id>x</id><display_order>first</display_order></group></comps>";

        assert!(parse(xml).is_err());
    }
}
