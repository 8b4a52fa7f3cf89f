use serde::{Deserialize, Serialize};

use crate::entry::{BlockLocation, NamespaceEntry};
use crate::error::TypeError;
use crate::path;

/// Summary of an entry as returned by the metadata service's `get-info`.
///
/// Text form: `name,size,path,owner,isDirectory,createdAt,parentName`
/// followed by one `,node:block` field per location. Paths, owners, and ids
/// are validated comma-free at creation time, so no escaping is needed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub name: String,
    pub size: i64,
    pub path: String,
    pub owner: String,
    pub is_directory: bool,
    /// Milliseconds since the UNIX epoch.
    pub created_at_ms: i64,
    /// Name of the parent directory; empty for the root.
    pub parent_name: String,
    pub locations: Vec<BlockLocation>,
}

const FIXED_FIELDS: usize = 7;

impl FileInfo {
    pub fn from_entry(entry: &NamespaceEntry) -> Self {
        Self {
            name: entry.name.clone(),
            size: entry.size,
            path: entry.path.clone(),
            owner: entry.owner.clone(),
            is_directory: entry.is_directory,
            created_at_ms: entry.created_at.timestamp_millis(),
            parent_name: entry
                .parent_path()
                .map(|p| path::file_name(p).to_string())
                .unwrap_or_default(),
            locations: entry.locations.clone(),
        }
    }

    /// Encode to the comma-joined wire form.
    pub fn encode(&self) -> String {
        let mut fields = vec![
            self.name.clone(),
            self.size.to_string(),
            self.path.clone(),
            self.owner.clone(),
            self.is_directory.to_string(),
            self.created_at_ms.to_string(),
            self.parent_name.clone(),
        ];
        fields.extend(self.locations.iter().map(ToString::to_string));
        fields.join(",")
    }

    /// Parse the comma-joined wire form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() < FIXED_FIELDS {
            return Err(TypeError::MalformedInfo(format!(
                "expected at least {FIXED_FIELDS} fields, got {}",
                parts.len()
            )));
        }
        let size = parts[1]
            .parse()
            .map_err(|_| TypeError::MalformedInfo(format!("bad size {:?}", parts[1])))?;
        let is_directory = parts[4]
            .parse()
            .map_err(|_| TypeError::MalformedInfo(format!("bad isDirectory {:?}", parts[4])))?;
        let created_at_ms = parts[5]
            .parse()
            .map_err(|_| TypeError::MalformedInfo(format!("bad createdAt {:?}", parts[5])))?;
        let locations = parts[FIXED_FIELDS..]
            .iter()
            .filter(|l| !l.is_empty())
            .map(|l| l.parse())
            .collect::<Result<Vec<BlockLocation>, _>>()?;
        Ok(Self {
            name: parts[0].to_string(),
            size,
            path: parts[2].to_string(),
            owner: parts[3].to_string(),
            is_directory,
            created_at_ms,
            parent_name: parts[6].to_string(),
            locations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{BlockId, NodeId};

    #[test]
    fn field_order_is_fixed() {
        let mut e = NamespaceEntry::file("/docs/a.txt", "u");
        e.size = 10;
        e.locations.push(BlockLocation::new(
            NodeId::new("dfs101").unwrap(),
            BlockId::new("b1").unwrap(),
        ));
        let info = FileInfo::from_entry(&e);
        let text = info.encode();
        let ms = e.created_at.timestamp_millis();
        assert_eq!(text, format!("a.txt,10,/docs/a.txt,u,false,{ms},docs,dfs101:b1"));
        assert_eq!(FileInfo::parse(&text).unwrap(), info);
    }

    #[test]
    fn directory_without_locations() {
        let e = NamespaceEntry::directory("/docs", "u");
        let text = FileInfo::from_entry(&e).encode();
        assert!(text.ends_with(",/"));
        let back = FileInfo::parse(&text).unwrap();
        assert!(back.is_directory);
        assert!(back.locations.is_empty());
        assert_eq!(back.parent_name, "/");
    }

    #[test]
    fn root_has_empty_parent_name() {
        let info = FileInfo::from_entry(&NamespaceEntry::root());
        assert_eq!(info.parent_name, "");
        assert_eq!(info.encode(), "/,0,/,root,true,0,");
    }

    #[test]
    fn rejects_truncated() {
        assert!(FileInfo::parse("a,1,/a").is_err());
        assert!(FileInfo::parse("a,x,/a,u,false,0,/").is_err());
    }
}
