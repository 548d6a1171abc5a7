// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `updateinfo.xml` file format.

Advisories are `<update>` elements. Nearly everything inside them is optional and
upstream producers differ in what they emit, so absent elements are simply left
unset.
*/

use {
    crate::{
        content::{
            Advisory, AdvisoryCollection, AdvisoryModule, AdvisoryPackage, AdvisoryReference,
            AdvisorySum,
        },
        error::Result,
        metadata::xml::{parse_bool, XmlReader, XmlWriter},
    },
    std::io::BufRead,
};

const FILE: &str = "updateinfo.xml";

/// Streaming reader of `<update>` records.
pub struct UpdateinfoReader<R: BufRead> {
    xml: XmlReader<R>,
    done: bool,
}

impl<R: BufRead> UpdateinfoReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            xml: XmlReader::new(source, FILE),
            done: false,
        }
    }

    fn next_advisory(&mut self) -> Result<Option<Advisory>> {
        let (start, empty) = match self.xml.find(b"update")? {
            Some(v) => v,
            None => return Ok(None),
        };

        let mut a = Advisory {
            from: self.xml.attr(&start, b"from")?,
            status: self.xml.attr(&start, b"status")?,
            advisory_type: self.xml.attr(&start, b"type")?,
            version: self.xml.attr(&start, b"version")?,
            ..Default::default()
        };

        if empty {
            return Err(self.xml.error("update", "advisory has no id"));
        }

        while let Some((e, empty)) = self.xml.next_child(b"update")? {
            match e.local_name().as_ref() {
                b"id" => a.id = self.xml.text(empty)?.trim().to_string(),
                b"title" => a.title = Some(self.xml.text(empty)?),
                b"issued" => {
                    a.issued_date = self.xml.attr(&e, b"date")?;
                    self.xml.finish(empty)?;
                }
                b"updated" => {
                    a.updated_date = self.xml.attr(&e, b"date")?;
                    self.xml.finish(empty)?;
                }
                b"rights" => a.rights = Some(self.xml.text(empty)?),
                b"release" => a.release = Some(self.xml.text(empty)?),
                b"pushcount" => a.pushcount = Some(self.xml.text(empty)?),
                b"severity" => a.severity = Some(self.xml.text(empty)?),
                b"summary" => a.summary = Some(self.xml.text(empty)?),
                b"description" => a.description = Some(self.xml.text(empty)?),
                b"solution" => a.solution = Some(self.xml.text(empty)?),
                b"reboot_suggested" => a.reboot_suggested = parse_bool(&self.xml.text(empty)?),
                b"references" if !empty => {
                    while let Some((r, empty)) = self.xml.next_child(b"references")? {
                        if r.local_name().as_ref() == b"reference" {
                            a.references.push(AdvisoryReference {
                                href: self.xml.attr(&r, b"href")?.unwrap_or_default(),
                                ref_id: self.xml.attr(&r, b"id")?,
                                ref_type: self.xml.attr(&r, b"type")?,
                                title: self.xml.attr(&r, b"title")?,
                            });
                        }
                        self.xml.finish(empty)?;
                    }
                }
                b"pkglist" if !empty => {
                    while let Some((c, empty)) = self.xml.next_child(b"pkglist")? {
                        if c.local_name().as_ref() == b"collection" && !empty {
                            let short = self.xml.attr(&c, b"short")?;
                            a.collections.push(self.read_collection(short)?);
                        } else {
                            self.xml.finish(empty)?;
                        }
                    }
                }
                _ => self.xml.finish(empty)?,
            }
        }

        if a.id.is_empty() {
            return Err(self.xml.error("id", "advisory has no id"));
        }

        Ok(Some(a))
    }

    fn read_collection(&mut self, short: Option<String>) -> Result<AdvisoryCollection> {
        let mut collection = AdvisoryCollection {
            short,
            ..Default::default()
        };

        while let Some((e, empty)) = self.xml.next_child(b"collection")? {
            match e.local_name().as_ref() {
                b"name" => collection.name = Some(self.xml.text(empty)?),
                b"module" => {
                    collection.module = Some(AdvisoryModule {
                        name: self.xml.required_attr(&e, b"name")?,
                        stream: self.xml.attr(&e, b"stream")?.unwrap_or_default(),
                        version: self.xml.attr(&e, b"version")?.unwrap_or_default(),
                        context: self.xml.attr(&e, b"context")?.unwrap_or_default(),
                        arch: self.xml.attr(&e, b"arch")?.unwrap_or_default(),
                    });
                    self.xml.finish(empty)?;
                }
                b"package" => {
                    let mut p = AdvisoryPackage {
                        name: self.xml.required_attr(&e, b"name")?,
                        epoch: self
                            .xml
                            .attr(&e, b"epoch")?
                            .unwrap_or_else(|| "0".to_string()),
                        version: self.xml.attr(&e, b"version")?.unwrap_or_default(),
                        release: self.xml.attr(&e, b"release")?.unwrap_or_default(),
                        arch: self.xml.attr(&e, b"arch")?.unwrap_or_default(),
                        src: self.xml.attr(&e, b"src")?,
                        ..Default::default()
                    };

                    if !empty {
                        self.read_package(&mut p)?;
                    }

                    collection.packages.push(p);
                }
                _ => self.xml.finish(empty)?,
            }
        }

        Ok(collection)
    }

    fn read_package(&mut self, p: &mut AdvisoryPackage) -> Result<()> {
        while let Some((e, empty)) = self.xml.next_child(b"package")? {
            match e.local_name().as_ref() {
                b"filename" => p.filename = Some(self.xml.text(empty)?),
                b"sum" => {
                    let sum_type = self.xml.required_attr(&e, b"type")?;
                    let value = self.xml.text(empty)?;
                    p.sum = Some(AdvisorySum { sum_type, value });
                }
                b"reboot_suggested" => p.reboot_suggested = parse_bool(&self.xml.text(empty)?),
                b"relogin_suggested" => p.relogin_suggested = parse_bool(&self.xml.text(empty)?),
                b"restart_suggested" => p.restart_suggested = parse_bool(&self.xml.text(empty)?),
                _ => self.xml.finish(empty)?,
            }
        }

        Ok(())
    }
}

impl<R: BufRead> Iterator for UpdateinfoReader<R> {
    type Item = Result<Advisory>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_advisory() {
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

fn write_flag(w: &mut XmlWriter, name: &str, value: bool) {
    if value {
        w.text(name, &[], "True");
    }
}

fn write_advisory(w: &mut XmlWriter, a: &Advisory, omit_sum: bool) {
    let mut attrs = vec![];
    if let Some(v) = &a.from {
        attrs.push(("from", v.as_str()));
    }
    if let Some(v) = &a.status {
        attrs.push(("status", v.as_str()));
    }
    if let Some(v) = &a.advisory_type {
        attrs.push(("type", v.as_str()));
    }
    if let Some(v) = &a.version {
        attrs.push(("version", v.as_str()));
    }

    w.start("update", &attrs);
    w.text("id", &[], &a.id);
    w.optional_text("title", a.title.as_deref());
    if let Some(date) = &a.issued_date {
        w.empty("issued", &[("date", date)]);
    }
    if let Some(date) = &a.updated_date {
        w.empty("updated", &[("date", date)]);
    }
    w.optional_text("rights", a.rights.as_deref());
    w.optional_text("release", a.release.as_deref());
    w.optional_text("pushcount", a.pushcount.as_deref());
    w.optional_text("severity", a.severity.as_deref());
    w.optional_text("summary", a.summary.as_deref());
    w.optional_text("description", a.description.as_deref());
    w.optional_text("solution", a.solution.as_deref());
    write_flag(w, "reboot_suggested", a.reboot_suggested);

    if a.references.is_empty() {
        w.empty("references", &[]);
    } else {
        w.start("references", &[]);
        for r in &a.references {
            let mut attrs = vec![("href", r.href.as_str())];
            if let Some(v) = &r.ref_id {
                attrs.push(("id", v));
            }
            if let Some(v) = &r.ref_type {
                attrs.push(("type", v));
            }
            if let Some(v) = &r.title {
                attrs.push(("title", v));
            }
            w.empty("reference", &attrs);
        }
        w.end("references");
    }

    if a.collections.is_empty() {
        w.empty("pkglist", &[]);
    } else {
        w.start("pkglist", &[]);
        for c in &a.collections {
            match &c.short {
                Some(short) => w.start("collection", &[("short", short)]),
                None => w.start("collection", &[]),
            }
            w.optional_text("name", c.name.as_deref());
            if let Some(m) = &c.module {
                w.empty(
                    "module",
                    &[
                        ("name", &m.name),
                        ("stream", &m.stream),
                        ("version", &m.version),
                        ("context", &m.context),
                        ("arch", &m.arch),
                    ],
                );
            }
            for p in &c.packages {
                let mut attrs = vec![
                    ("name", p.name.as_str()),
                    ("epoch", &p.epoch),
                    ("version", &p.version),
                    ("release", &p.release),
                    ("arch", &p.arch),
                ];
                if let Some(src) = &p.src {
                    attrs.push(("src", src));
                }
                w.start("package", &attrs);
                w.optional_text("filename", p.filename.as_deref());
                if let Some(sum) = p.sum.as_ref().filter(|_| !omit_sum) {
                    w.text("sum", &[("type", &sum.sum_type)], &sum.value);
                }
                write_flag(w, "reboot_suggested", p.reboot_suggested);
                write_flag(w, "relogin_suggested", p.relogin_suggested);
                write_flag(w, "restart_suggested", p.restart_suggested);
                w.end("package");
            }
            w.end("collection");
        }
        w.end("pkglist");
    }

    w.end("update");
}

/// Render a single advisory as an `<update>` fragment.
pub fn render_advisory(a: &Advisory, omit_sum: bool) -> String {
    let mut w = XmlWriter::fragment();
    write_advisory(&mut w, a, omit_sum);
    w.finish()
}

/// Render an `updateinfo.xml` document.
///
/// When `omit_sum` is set no `<sum>` element is emitted anywhere.
pub fn render(advisories: &[&Advisory], omit_sum: bool) -> String {
    let mut w = XmlWriter::new();
    w.start("updates", &[]);

    for a in advisories {
        write_advisory(&mut w, a, omit_sum);
    }

    w.end("updates");
    w.finish()
}

#[cfg(test)]
mod test {
    use super::*;

    const UPDATEINFO_XML: &str = include_str!("../../testdata/updateinfo.xml");

    fn parse(xml: &str) -> Result<Vec<Advisory>> {
        UpdateinfoReader::new(xml.as_bytes()).collect()
    }

    #[test]
    fn parse_advisories() -> Result<()> {
        let advisories = parse(UPDATEINFO_XML)?;
        assert_eq!(advisories.len(), 2);

        let a = &advisories[0];
        assert_eq!(a.id, "RHEA-2012:0055");
        assert_eq!(a.advisory_type.as_deref(), Some("enhancement"));
        assert_eq!(a.issued_date.as_deref(), Some("2012-01-27 16:08:06"));
        assert_eq!(a.updated_date.as_deref(), Some("2012-01-27 16:08:06"));
        assert!(a.reboot_suggested);
        assert_eq!(a.references.len(), 1);
        assert_eq!(a.collections.len(), 1);

        let c = &a.collections[0];
        assert_eq!(c.short.as_deref(), Some("F18_bird"));
        assert_eq!(c.packages.len(), 2);
        assert_eq!(c.packages[0].filename.as_deref(), Some("bear-4.1-1.noarch.rpm"));
        assert_eq!(c.packages[0].sum.as_ref().unwrap().sum_type, "sha256");
        assert!(c.packages[1].sum.is_none());
        assert!(c.packages[1].restart_suggested);

        let b = &advisories[1];
        assert_eq!(b.id, "RHSA-2019:1234");
        assert!(b.updated_date.is_none());
        assert!(b.references.is_empty());
        assert_eq!(b.collections[0].module.as_ref().unwrap().name, "duck");

        Ok(())
    }

    #[test]
    fn render_then_parse() -> Result<()> {
        let advisories = parse(UPDATEINFO_XML)?;
        let refs = advisories.iter().collect::<Vec<_>>();

        assert_eq!(parse(&render(&refs, false))?, advisories);

        Ok(())
    }

    #[test]
    fn omit_sum_removes_every_sum_element() -> Result<()> {
        let advisories = parse(UPDATEINFO_XML)?;
        let refs = advisories.iter().collect::<Vec<_>>();

        let with_sum = render(&refs, false);
        let without_sum = render(&refs, true);

        let element_names = |xml: &str| -> Vec<String> {
            let mut reader = XmlReader::new(xml.as_bytes(), FILE);
            let mut names = vec![];
            loop {
                match reader.next().unwrap() {
                    quick_xml::events::Event::Start(e) | quick_xml::events::Event::Empty(e) => {
                        names.push(crate::metadata::xml::local_name(&e))
                    }
                    quick_xml::events::Event::Eof => break,
                    _ => {}
                }
            }
            names
        };

        assert!(element_names(&with_sum).iter().any(|n| n == "sum"));
        assert!(!element_names(&without_sum).iter().any(|n| n == "sum"));

        Ok(())
    }
}
