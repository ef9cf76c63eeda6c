use std::collections::BTreeMap;

use kahmi_hashing::FingerprintHasher;
use serde_json::Value;

/// Snapshot of a task's fingerprintable state, built by
/// `Task::get_task_inputs()` (`spec.md §4.3`).
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TaskInputs {
    pub files: BTreeMap<String, Vec<String>>,
    pub values: BTreeMap<String, Value>,
}

impl TaskInputs {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.values.is_empty()
    }

    /// MD5 over the canonical JSON of `{files, values}` followed by the
    /// sorted, concatenated contents of every file named in `files`
    /// (`spec.md §4.3`, steps 1-4). Missing files contribute nothing.
    pub fn fingerprint(&self) -> String {
        let mut hasher = FingerprintHasher::new();

        // `serde_json::Map`'s default backend is a `BTreeMap`, so this
        // serialization is already key-sorted without extra work.
        let payload = serde_json::json!({ "files": self.files, "values": self.values });
        let bytes = serde_json::to_vec(&payload).expect("TaskInputs payload is always valid JSON");
        hasher.update(&bytes);

        let mut filenames: Vec<&str> = self
            .files
            .values()
            .flat_map(|names| names.iter().map(String::as_str))
            .collect();
        filenames.sort_unstable();
        filenames.dedup();

        for filename in filenames {
            // A read error other than "not found" (e.g. permission denied)
            // is not expected for build inputs; treat it the same as a
            // missing file rather than failing fingerprinting outright.
            let _ = hasher.update_file(std::path::Path::new(filename));
        }

        hasher.finish().to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn identical_inputs_yield_identical_fingerprints() {
        let mut inputs = TaskInputs::default();
        inputs.values.insert("greeting".into(), Value::String("hi".into()));
        let other = inputs.clone();
        assert_eq!(inputs.fingerprint(), other.fingerprint());
    }

    #[test]
    fn changing_a_file_byte_changes_the_fingerprint() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello").unwrap();
        file.flush().unwrap();

        let mut inputs = TaskInputs::default();
        inputs
            .files
            .insert("src".into(), vec![file.path().to_str().unwrap().to_string()]);
        let before = inputs.fingerprint();

        file.as_file().set_len(0).unwrap();
        file.write_all(b"world").unwrap();
        file.flush().unwrap();
        let after = inputs.fingerprint();

        assert_ne!(before, after);
    }

    #[test]
    fn missing_files_are_silently_skipped() {
        let mut inputs = TaskInputs::default();
        inputs
            .files
            .insert("src".into(), vec!["/no/such/path/kahmi-test".into()]);
        // Must not panic and must produce a stable digest.
        assert_eq!(inputs.fingerprint().len(), 32);
    }

    #[test]
    fn empty_inputs_has_a_fingerprint_too() {
        let inputs = TaskInputs::default();
        assert!(inputs.is_empty());
        assert_eq!(inputs.fingerprint().len(), 32);
    }
}
