use crate::error::ParseError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::HashSet, env, io::Read};
use time::{format_description::well_known::Rfc3339, Date, OffsetDateTime, PrimitiveDateTime};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogEntry {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Icon")]
    pub icon: String,
    #[serde(rename = "Developer")]
    pub developer: String,
    #[serde(rename = "Summary")]
    pub summary: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Website")]
    pub website: String,
    #[serde(rename = "Screenshots")]
    pub screenshots: Vec<Screenshot>,
    #[serde(
        rename = "Date",
        deserialize_with = "deserialize_date",
        serialize_with = "serialize_date"
    )]
    pub date: Option<OffsetDateTime>,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Source")]
    pub source: EntrySource,
    #[serde(rename = "Requires")]
    pub requires: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Screenshot {
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "Type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntrySource {
    #[serde(rename = "Git")]
    pub git: String,
    #[serde(rename = "Package")]
    pub package: String,
}

impl CatalogEntry {
    pub fn primary_screenshot(&self) -> Option<&Screenshot> {
        self.screenshots.first()
    }

    pub fn detail(&self) -> EntryDetail {
        EntryDetail {
            id: self.id.clone(),
            name: self.name.clone(),
            developer: self.developer.clone(),
            version: self.version.clone(),
            date: self.date.and_then(format_release_date).unwrap_or_default(),
            summary: self.summary.clone(),
            website_host: website_host(&self.website).unwrap_or_default(),
            website: self.website.clone(),
            package: self.source.package.clone(),
        }
    }
}

/// Display-ready fields for the entry detail pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryDetail {
    pub id: String,
    pub name: String,
    pub developer: String,
    pub version: String,
    pub date: String,
    pub summary: String,
    pub website_host: String,
    pub website: String,
    pub package: String,
}

/// Entries sorted by display name, unique by id, all compatible with the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    #[cfg(test)]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }
}

/// Requirement tokens the running host satisfies. An empty `Requires` always passes;
/// otherwise every comma separated token must be satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compatibility {
    satisfied: HashSet<String>,
}

impl Compatibility {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let satisfied = tokens
            .into_iter()
            .map(|token| token.as_ref().trim().to_string())
            .filter(|token| !token.is_empty())
            .collect();
        Self { satisfied }
    }

    pub fn allows(&self, requires: &str) -> bool {
        requires
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .all(|token| self.satisfied.contains(token))
    }
}

pub fn default_requirements() -> Vec<String> {
    vec![
        env::consts::OS.to_string(),
        env::consts::FAMILY.to_string(),
        "desktop".to_string(),
    ]
}

pub fn parse<R: Read>(reader: R, compat: &Compatibility) -> Result<Catalog, ParseError> {
    let decoded: Vec<CatalogEntry> = serde_json::from_reader(reader)?;
    let mut seen = HashSet::new();
    let mut entries: Vec<CatalogEntry> = decoded
        .into_iter()
        .filter(|entry| compat.allows(&entry.requires))
        .filter(|entry| seen.insert(entry.id.clone()))
        .collect();
    // sort_by is stable, so equal names keep decode order.
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Catalog { entries })
}

pub fn format_release_date(date: OffsetDateTime) -> Option<String> {
    let format = time::macros::format_description!("[day] [month repr:short] [year]");
    date.format(&format).ok()
}

pub fn website_host(website: &str) -> Option<String> {
    let (scheme, rest) = website.trim().split_once("://")?;
    let valid_scheme = scheme
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "+-.".contains(ch));
    if scheme.is_empty() || !valid_scheme {
        return None;
    }
    let authority = rest.split(&['/', '?', '#'][..]).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    Some(host.to_string())
}

fn parse_release_date(value: &str) -> Option<OffsetDateTime> {
    let trimmed = value.trim();
    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(dt);
    }
    let naive_format =
        time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(trimmed, &naive_format) {
        return Some(dt.assume_utc());
    }
    let date_format = time::macros::format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(trimmed, &date_format) {
        return date.with_hms(0, 0, 0).ok().map(|dt| dt.assume_utc());
    }
    None
}

fn deserialize_date<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => Ok(None),
        Some(value) => parse_release_date(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {value}"))),
    }
}

fn serialize_date<S>(date: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match date {
        Some(date) => {
            let formatted = date.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
            serializer.serialize_some(&formatted)
        }
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_host() -> Compatibility {
        Compatibility::new(["linux", "unix", "desktop"])
    }

    #[test]
    fn sorts_by_name() {
        let raw = r#"[{"ID":"b","Name":"Beta","Requires":""}, {"ID":"a","Name":"Alpha","Requires":""}]"#;
        let catalog = parse(raw.as_bytes(), &any_host()).unwrap();
        assert_eq!(catalog.names(), vec!["Alpha", "Beta"]);
    }

    #[test]
    fn sort_is_case_sensitive_ordinal() {
        let raw = r#"[{"ID":"1","Name":"alpha"},{"ID":"2","Name":"Zeta"},{"ID":"3","Name":"Beta"}]"#;
        let catalog = parse(raw.as_bytes(), &any_host()).unwrap();
        assert_eq!(catalog.names(), vec!["Beta", "Zeta", "alpha"]);
    }

    #[test]
    fn equal_names_keep_decode_order() {
        let raw = r#"[{"ID":"first","Name":"Same"},{"ID":"0","Name":"Aaa"},{"ID":"second","Name":"Same"}]"#;
        let catalog = parse(raw.as_bytes(), &any_host()).unwrap();
        let ids: Vec<&str> = catalog.entries().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "first", "second"]);
    }

    #[test]
    fn drops_incompatible_entries() {
        let raw = r#"[
            {"ID":"a","Name":"A","Requires":""},
            {"ID":"b","Name":"B","Requires":"mobile"},
            {"ID":"c","Name":"C","Requires":"linux, desktop"},
            {"ID":"d","Name":"D","Requires":"linux,mobile"}
        ]"#;
        let compat = any_host();
        let catalog = parse(raw.as_bytes(), &compat).unwrap();
        assert_eq!(catalog.names(), vec!["A", "C"]);
        assert!(catalog.entries().iter().all(|e| compat.allows(&e.requires)));
    }

    #[test]
    fn empty_compatibility_still_allows_unconstrained_entries() {
        let compat = Compatibility::new(Vec::<String>::new());
        assert!(compat.allows(""));
        assert!(compat.allows("  "));
        assert!(!compat.allows("linux"));
    }

    #[test]
    fn duplicate_ids_keep_first() {
        let raw = r#"[{"ID":"x","Name":"One"},{"ID":"x","Name":"Two"}]"#;
        let catalog = parse(raw.as_bytes(), &any_host()).unwrap();
        assert_eq!(catalog.names(), vec!["One"]);
    }

    #[test]
    fn parse_is_deterministic() {
        let raw = include_str!("../testdata/apps-list.json");
        let first = parse(raw.as_bytes(), &any_host()).unwrap();
        let second = parse(raw.as_bytes(), &any_host()).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn structural_error_is_parse_error() {
        assert!(parse(r#"{"ID":"a"}"#.as_bytes(), &any_host()).is_err());
        assert!(parse(r#"[{"ID":"a","Name":"A""#.as_bytes(), &any_host()).is_err());
        assert!(parse(r#"[{"ID":"a","Screenshots":"nope"}]"#.as_bytes(), &any_host()).is_err());
    }

    #[test]
    fn decodes_full_entry() {
        let raw = r#"[{
            "ID": "xyz.andy.notes",
            "Name": "Notes",
            "Icon": "https://example.com/icons/notes.png",
            "Developer": "Andy",
            "Summary": "A notes app",
            "URL": "https://example.com/notes",
            "Website": "https://notes.example.com/about?x=1",
            "Screenshots": [{"Image": "https://example.com/shot.png", "Type": "desktop"}],
            "Date": "2020-06-02T00:00:00Z",
            "Version": "1.2.0",
            "Source": {"Git": "https://github.com/andy/notes", "Package": "github.com/andy/notes"},
            "Requires": ""
        }]"#;
        let catalog = parse(raw.as_bytes(), &any_host()).unwrap();
        let entry = catalog.find("xyz.andy.notes").unwrap();
        assert_eq!(entry.source.package, "github.com/andy/notes");
        assert_eq!(entry.primary_screenshot().unwrap().kind, "desktop");

        let detail = entry.detail();
        assert_eq!(detail.date, "02 Jun 2020");
        assert_eq!(detail.website_host, "notes.example.com");
    }

    #[test]
    fn lenient_and_missing_dates() {
        let raw = r#"[{"ID":"a","Name":"A","Date":"2021-03-04"},{"ID":"b","Name":"B"},{"ID":"c","Name":"C","Date":null}]"#;
        let catalog = parse(raw.as_bytes(), &any_host()).unwrap();
        assert_eq!(catalog.find("a").unwrap().detail().date, "04 Mar 2021");
        assert_eq!(catalog.find("b").unwrap().date, None);
        assert_eq!(catalog.find("c").unwrap().date, None);
        assert!(parse(r#"[{"ID":"a","Date":"last tuesday"}]"#.as_bytes(), &any_host()).is_err());
    }

    #[test]
    fn website_host_handles_bad_urls() {
        assert_eq!(website_host("https://fyne.io/apps"), Some("fyne.io".to_string()));
        assert_eq!(website_host("http://user@host:8080/x"), Some("host:8080".to_string()));
        assert_eq!(website_host("fyne.io"), None);
        assert_eq!(website_host(""), None);
        assert_eq!(website_host("https://"), None);
    }
}
