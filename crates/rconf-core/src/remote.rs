use indexmap::IndexMap;

/// Options of a single remote, kept in insertion order so saved files diff cleanly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    options: IndexMap<String, String>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    /// Option names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Set an option. Overwriting keeps the option's original position.
    pub fn set_string(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.options.insert(name.into(), value.into());
    }

    /// Remove an option, returning whether it existed.
    pub fn delete(&mut self, name: &str) -> bool {
        self.options.shift_remove(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.options
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Section {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut section = Section::new();
        for (k, v) in iter {
            section.set_string(k, v);
        }
        section
    }
}

/// All configured remotes, keyed by unique name in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    sections: IndexMap<String, Section>,
}

impl RemoteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_remotes(&self) -> Vec<&str> {
        self.sections.keys().map(String::as_str).collect()
    }

    pub fn has_remote(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn get_remote(&self, name: &str) -> Option<&Section> {
        self.sections.get(name)
    }

    pub fn get_remote_mut(&mut self, name: &str) -> Option<&mut Section> {
        self.sections.get_mut(name)
    }

    /// Returns the section for `name`, creating an empty one if it does not exist yet.
    /// An existing section is returned as-is for in-place mutation.
    pub fn create_remote(&mut self, name: impl Into<String>) -> &mut Section {
        self.sections.entry(name.into()).or_default()
    }

    /// Remove a remote, returning whether it existed.
    pub fn delete_remote(&mut self, name: &str) -> bool {
        self.sections.shift_remove(name).is_some()
    }

    /// Copy every option of `source` into `destination`, creating the destination if needed.
    /// Returns `false` (and changes nothing) when `source` does not exist.
    pub fn copy_remote(&mut self, source: &str, destination: &str) -> bool {
        let Some(options) = self.sections.get(source).cloned() else {
            return false;
        };
        let target = self.create_remote(destination);
        for (k, v) in options.iter() {
            target.set_string(k, v);
        }
        true
    }

    /// Copy-then-delete. Renaming onto itself is a no-op that reports success.
    pub fn rename_remote(&mut self, old_name: &str, new_name: &str) -> bool {
        if old_name == new_name {
            return self.has_remote(old_name);
        }
        if !self.copy_remote(old_name, new_name) {
            return false;
        }
        self.delete_remote(old_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Section)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent_and_mutates_in_place() {
        let mut cfg = RemoteConfig::new();
        cfg.create_remote("s3").set_string("type", "s3");
        cfg.create_remote("s3").set_string("region", "eu-west-1");

        assert_eq!(cfg.list_remotes(), vec!["s3"]);
        let section = cfg.get_remote("s3").expect("remote exists");
        assert_eq!(section.get_string("type"), Some("s3"));
        assert_eq!(section.get_string("region"), Some("eu-west-1"));
    }

    #[test]
    fn list_tracks_created_minus_deleted() {
        let mut cfg = RemoteConfig::new();
        for name in ["a", "b", "c", "b"] {
            cfg.create_remote(name);
        }
        assert!(cfg.delete_remote("a"));
        assert!(!cfg.delete_remote("a"));

        assert!(!cfg.has_remote("a"));
        assert_eq!(cfg.list_remotes(), vec!["b", "c"]);
    }

    #[test]
    fn preserves_insertion_order_after_overwrite() {
        let mut section = Section::new();
        section.set_string("type", "drive");
        section.set_string("token", "x");
        section.set_string("type", "onedrive");

        assert_eq!(section.keys().collect::<Vec<_>>(), vec!["type", "token"]);
        assert_eq!(section.get_string("type"), Some("onedrive"));
    }

    #[test]
    fn section_delete_reports_presence() {
        let mut section: Section = [("type", "local")].into_iter().collect();
        assert!(section.delete("type"));
        assert!(!section.delete("type"));
        assert!(section.is_empty());
    }

    #[test]
    fn rename_moves_all_options() {
        let mut cfg = RemoteConfig::new();
        let old = cfg.create_remote("old");
        old.set_string("type", "sftp");
        old.set_string("host", "example.com");

        assert!(cfg.rename_remote("old", "new"));
        assert!(!cfg.has_remote("old"));
        let new = cfg.get_remote("new").expect("renamed");
        assert_eq!(new.get_string("host"), Some("example.com"));
    }

    #[test]
    fn rename_missing_source_changes_nothing() {
        let mut cfg = RemoteConfig::new();
        assert!(!cfg.rename_remote("ghost", "new"));
        assert!(cfg.is_empty());
    }

    #[test]
    fn copy_merges_into_existing_destination() {
        let mut cfg = RemoteConfig::new();
        cfg.create_remote("src").set_string("type", "b2");
        cfg.create_remote("dst").set_string("account", "me");

        assert!(cfg.copy_remote("src", "dst"));
        let dst = cfg.get_remote("dst").expect("dst");
        assert_eq!(dst.get_string("type"), Some("b2"));
        assert_eq!(dst.get_string("account"), Some("me"));
        assert!(cfg.has_remote("src"));
    }
}
