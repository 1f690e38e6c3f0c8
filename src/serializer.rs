//! Deterministic XML encode/decode of one [`HashList`] (§4.7).
//!
//! Encoding order is fixed: media hashes by lexicographic `relative_path`,
//! hash entries within a media hash by descending algorithm priority,
//! directory hashes by lexicographic `relative_path`. Timestamps are
//! RFC 3339 (ISO-8601 with seconds precision and an explicit offset).
//! Elements the decoder doesn't recognize are kept in `extra` and written
//! back verbatim on re-encode, so a generation file produced by a newer
//! tool version round-trips through an older one without data loss.

use std::io::Cursor;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::hash::HashAlgorithm;
use crate::model::{CreatorInfo, DirectoryHash, HashEntry, HashEntryAction, HashList, HashValue, MediaHash, ProcessInfo};

const SCHEMA_VERSION: &str = "2.0";

pub fn encode(hash_list: &HashList) -> Result<String> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    let mut root = BytesStart::new("hashlist");
    root.push_attribute(("version", SCHEMA_VERSION));
    root.push_attribute(("generation", hash_list.generation_number.to_string().as_str()));
    writer.write_event(Event::Start(root.clone()))?;

    write_creator_info(&mut writer, &hash_list.creator)?;
    write_process_info(&mut writer, &hash_list.process)?;
    write_references(&mut writer, &hash_list.references)?;
    write_media_hashes(&mut writer, hash_list)?;
    write_directory_hashes(&mut writer, hash_list)?;
    write_extra(&mut writer, &hash_list.extra)?;

    writer.write_event(Event::End(BytesEnd::new("hashlist")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).context("encoded generation file was not valid UTF-8")
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    if !text.is_empty() {
        writer.write_event(Event::Text(BytesText::new(text)))?;
    }
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_creator_info(writer: &mut Writer<Cursor<Vec<u8>>>, creator: &CreatorInfo) -> Result<()> {
    let CreatorInfo { creation_date, host_name, tool_name, tool_version } = creator;
    writer.write_event(Event::Start(BytesStart::new("creatorinfo")))?;
    write_text_element(writer, "creationdate", &creation_date.to_rfc3339())?;
    write_text_element(writer, "hostname", host_name)?;
    write_text_element(writer, "toolname", tool_name)?;
    write_text_element(writer, "toolversion", tool_version)?;
    writer.write_event(Event::End(BytesEnd::new("creatorinfo")))?;
    Ok(())
}

fn write_process_info(writer: &mut Writer<Cursor<Vec<u8>>>, process: &ProcessInfo) -> Result<()> {
    let ProcessInfo { process_type, ignore_patterns } = process;
    writer.write_event(Event::Start(BytesStart::new("processinfo")))?;
    write_text_element(writer, "processtype", process_type)?;
    writer.write_event(Event::Start(BytesStart::new("ignorepatterns")))?;
    for pattern in ignore_patterns {
        write_text_element(writer, "pattern", pattern)?;
    }
    writer.write_event(Event::End(BytesEnd::new("ignorepatterns")))?;
    writer.write_event(Event::End(BytesEnd::new("processinfo")))?;
    Ok(())
}

fn write_references(writer: &mut Writer<Cursor<Vec<u8>>>, references: &[(u32, HashValue)]) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("references")))?;
    for (generation, value) in references {
        let mut start = BytesStart::new("reference");
        start.push_attribute(("generation", generation.to_string().as_str()));
        start.push_attribute(("algorithm", value.algorithm.as_str()));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&value.digest)))?;
        writer.write_event(Event::End(BytesEnd::new("reference")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("references")))?;
    Ok(())
}

fn action_str(action: HashEntryAction) -> &'static str {
    match action {
        HashEntryAction::Original => "original",
        HashEntryAction::Verified => "verified",
        HashEntryAction::Failed => "failed",
        HashEntryAction::New => "new",
    }
}

fn parse_action(s: &str) -> Result<HashEntryAction> {
    match s {
        "original" => Ok(HashEntryAction::Original),
        "verified" => Ok(HashEntryAction::Verified),
        "failed" => Ok(HashEntryAction::Failed),
        "new" => Ok(HashEntryAction::New),
        other => anyhow::bail!("unknown hash entry action '{other}'"),
    }
}

fn write_media_hashes(writer: &mut Writer<Cursor<Vec<u8>>>, hash_list: &HashList) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("hashes")))?;
    for media_hash in hash_list.media_hashes_sorted() {
        let mut start = BytesStart::new("hash");
        start.push_attribute(("path", media_hash.relative_path.as_str()));
        start.push_attribute(("size", media_hash.size_bytes.to_string().as_str()));
        start.push_attribute(("lastmodified", media_hash.last_modified.to_rfc3339().as_str()));
        writer.write_event(Event::Start(start))?;

        for entry in media_hash.hash_entries_by_priority() {
            let mut el = BytesStart::new(entry.value.algorithm.as_str());
            el.push_attribute(("action", action_str(entry.action)));
            writer.write_event(Event::Start(el))?;
            writer.write_event(Event::Text(BytesText::new(&entry.value.digest)))?;
            writer.write_event(Event::End(BytesEnd::new(entry.value.algorithm.as_str())))?;
        }
        write_extra(writer, &media_hash.extra)?;

        writer.write_event(Event::End(BytesEnd::new("hash")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("hashes")))?;
    Ok(())
}

fn write_directory_hashes(writer: &mut Writer<Cursor<Vec<u8>>>, hash_list: &HashList) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("directoryhashes")))?;
    for dir_hash in hash_list.directory_hashes_sorted() {
        let mut start = BytesStart::new("directoryhash");
        start.push_attribute(("path", dir_hash.relative_path.as_str()));
        start.push_attribute(("lastmodified", dir_hash.last_modified.to_rfc3339().as_str()));
        start.push_attribute(("algorithm", dir_hash.hash_value.algorithm.as_str()));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(&dir_hash.hash_value.digest)))?;
        writer.write_event(Event::End(BytesEnd::new("directoryhash")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("directoryhashes")))?;
    Ok(())
}

fn write_extra(writer: &mut Writer<Cursor<Vec<u8>>>, extra: &indexmap::IndexMap<String, String>) -> Result<()> {
    for (name, text) in extra {
        write_text_element(writer, name, text)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------

/// A minimal generic XML tree, enough to decode the fixed shape above
/// while keeping unrecognized elements around verbatim.
struct XmlElement {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }
}

fn parse_tree(xml: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event().context("reading XML event")? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = Vec::new();
                for attr in e.attributes() {
                    let attr = attr.context("reading XML attribute")?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value().context("unescaping XML attribute value")?.into_owned();
                    attrs.push((key, value));
                }
                stack.push(XmlElement { name, attrs, children: Vec::new(), text: String::new() });
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let mut attrs = Vec::new();
                for attr in e.attributes() {
                    let attr = attr.context("reading XML attribute")?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value().context("unescaping XML attribute value")?.into_owned();
                    attrs.push((key, value));
                }
                let el = XmlElement { name, attrs, children: Vec::new(), text: String::new() };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None => root = Some(el),
                }
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&e.unescape().context("unescaping XML text")?);
                }
            }
            Event::End(_) => {
                let finished = stack.pop().context("unbalanced XML end tag")?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(finished),
                    None => root = Some(finished),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.context("XML document had no root element")
}

fn parse_timestamp(s: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).with_context(|| format!("invalid RFC 3339 timestamp '{s}'"))
}

pub fn decode(xml: &str, root_path: Utf8PathBuf) -> Result<HashList> {
    let tree = parse_tree(xml)?;
    if tree.name != "hashlist" {
        anyhow::bail!("expected root element 'hashlist', found '{}'", tree.name);
    }

    let generation_number: u32 = tree
        .attr("generation")
        .context("missing 'generation' attribute on <hashlist>")?
        .parse()
        .context("invalid 'generation' attribute")?;

    let creator_el = tree.child("creatorinfo").context("missing <creatorinfo>")?;
    let creator = CreatorInfo {
        creation_date: parse_timestamp(
            creator_el.child("creationdate").context("missing <creationdate>")?.text.as_str(),
        )?,
        host_name: creator_el.child("hostname").context("missing <hostname>")?.text.clone(),
        tool_name: creator_el.child("toolname").context("missing <toolname>")?.text.clone(),
        tool_version: creator_el.child("toolversion").context("missing <toolversion>")?.text.clone(),
    };

    let process_el = tree.child("processinfo").context("missing <processinfo>")?;
    let ignore_patterns = process_el
        .child("ignorepatterns")
        .map(|el| el.children_named("pattern").map(|p| p.text.clone()).collect())
        .unwrap_or_default();
    let process = ProcessInfo {
        process_type: process_el.child("processtype").context("missing <processtype>")?.text.clone(),
        ignore_patterns,
    };

    let mut references = Vec::new();
    if let Some(refs_el) = tree.child("references") {
        for reference in refs_el.children_named("reference") {
            let generation: u32 = reference
                .attr("generation")
                .context("missing 'generation' attribute on <reference>")?
                .parse()
                .context("invalid 'generation' attribute on <reference>")?;
            let algorithm: HashAlgorithm = reference
                .attr("algorithm")
                .context("missing 'algorithm' attribute on <reference>")?
                .parse()?;
            references.push((generation, HashValue::new(algorithm, reference.text.clone())));
        }
    }

    let mut hash_list = HashList::new(generation_number, root_path, creator, process);
    hash_list.references = references;

    if let Some(hashes_el) = tree.child("hashes") {
        for hash_el in hashes_el.children_named("hash") {
            let path = hash_el.attr("path").context("missing 'path' attribute on <hash>")?;
            let size_bytes: u64 = hash_el
                .attr("size")
                .context("missing 'size' attribute on <hash>")?
                .parse()
                .context("invalid 'size' attribute on <hash>")?;
            let last_modified = parse_timestamp(hash_el.attr("lastmodified").context("missing 'lastmodified' attribute on <hash>")?)?;

            let mut media_hash = MediaHash::new(path, size_bytes, last_modified)?;
            for child in &hash_el.children {
                match child.name.parse::<HashAlgorithm>() {
                    Ok(algorithm) => {
                        let action = parse_action(child.attr("action").context("missing 'action' attribute on hash entry")?)?;
                        media_hash.set_hash_entry(HashEntry::new(HashValue::new(algorithm, child.text.clone()), action));
                    }
                    Err(_) => {
                        media_hash.extra.insert(child.name.clone(), child.text.clone());
                    }
                }
            }
            hash_list.upsert_media_hash(media_hash);
        }
    }

    if let Some(dir_hashes_el) = tree.child("directoryhashes") {
        for dir_el in dir_hashes_el.children_named("directoryhash") {
            let path = dir_el.attr("path").context("missing 'path' attribute on <directoryhash>")?;
            let last_modified = parse_timestamp(dir_el.attr("lastmodified").context("missing 'lastmodified' attribute on <directoryhash>")?)?;
            let algorithm: HashAlgorithm = dir_el.attr("algorithm").context("missing 'algorithm' attribute on <directoryhash>")?.parse()?;
            hash_list.add_directory_hash(DirectoryHash::new(path, last_modified, HashValue::new(algorithm, dir_el.text.clone()))?);
        }
    }

    for child in &tree.children {
        if !matches!(child.name.as_str(), "creatorinfo" | "processinfo" | "references" | "hashes" | "directoryhashes") {
            hash_list.extra.insert(child.name.clone(), child.text.clone());
        }
    }

    Ok(hash_list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;
    use chrono::TimeZone;

    fn sample_hash_list() -> HashList {
        let ts = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 3, 5, 14, 30, 7).unwrap();
        let creator = CreatorInfo {
            creation_date: ts,
            host_name: "workstation".to_string(),
            tool_name: "ascmhl".to_string(),
            tool_version: "0.1.0".to_string(),
        };
        let process = ProcessInfo { process_type: "in-place".to_string(), ignore_patterns: vec!["*.tmp".to_string()] };
        let mut hash_list = HashList::new(1, Utf8PathBuf::from("/tmp/shoot"), creator, process);

        let mut media_hash = MediaHash::new("Clips/test1.mov", 1024, ts).unwrap();
        media_hash.set_hash_entry(HashEntry::new(HashValue::new(HashAlgorithm::C4, "c4deadbeef"), HashEntryAction::Original));
        hash_list.upsert_media_hash(media_hash);

        hash_list.add_directory_hash(
            DirectoryHash::new("Clips", ts, HashValue::new(HashAlgorithm::C4, "c4folderhash")).unwrap(),
        );
        hash_list
    }

    #[test]
    fn encode_then_decode_round_trips_media_hashes() {
        let original = sample_hash_list();
        let xml = encode(&original).unwrap();
        let decoded = decode(&xml, Utf8PathBuf::from("/tmp/shoot")).unwrap();

        assert_eq!(decoded.generation_number, 1);
        assert_eq!(decoded.process.ignore_patterns, vec!["*.tmp".to_string()]);
        let media_hash = decoded.media_hash("Clips/test1.mov").unwrap();
        let entry = media_hash.entry_for(HashAlgorithm::C4).unwrap();
        assert_eq!(entry.value.digest, "c4deadbeef");
        assert_eq!(entry.action, HashEntryAction::Original);
    }

    #[test]
    fn unknown_elements_are_preserved_on_round_trip() {
        let mut original = sample_hash_list();
        original.extra.insert("futurefield".to_string(), "keep-me".to_string());
        let xml = encode(&original).unwrap();
        let decoded = decode(&xml, Utf8PathBuf::from("/tmp/shoot")).unwrap();
        assert_eq!(decoded.extra.get("futurefield"), Some(&"keep-me".to_string()));
    }

    #[test]
    fn media_hashes_are_encoded_in_lexicographic_order() {
        let ts = FixedOffset::east_opt(0).unwrap().with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let creator = CreatorInfo { creation_date: ts, host_name: "h".into(), tool_name: "t".into(), tool_version: "1".into() };
        let mut hash_list = HashList::new(1, Utf8PathBuf::from("/tmp"), creator, ProcessInfo::default());
        for name in ["zebra.mov", "alpha.mov", "mike.mov"] {
            let mut mh = MediaHash::new(name, 1, ts).unwrap();
            mh.set_hash_entry(HashEntry::new(HashValue::new(HashAlgorithm::Md5, "0".repeat(32)), HashEntryAction::Original));
            hash_list.upsert_media_hash(mh);
        }
        let xml = encode(&hash_list).unwrap();
        let alpha_pos = xml.find("alpha.mov").unwrap();
        let mike_pos = xml.find("mike.mov").unwrap();
        let zebra_pos = xml.find("zebra.mov").unwrap();
        assert!(alpha_pos < mike_pos && mike_pos < zebra_pos);
    }
}
