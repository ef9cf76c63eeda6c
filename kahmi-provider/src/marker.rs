/// Classifies the role a `Property` plays in fingerprinting and
/// dependency inference (`spec.md §3`, "Property").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Contributes to the input fingerprint by JSON-canonical stringification.
    Input,
    /// Value must be a string or list of strings; the contents of each named
    /// file contribute to the fingerprint.
    InputFile,
    /// Like `InputFile`, but the value names a directory.
    InputDir,
    /// Reading from this property in another task's property introduces an
    /// automatic task-to-task dependency.
    Output,
}

/// Opaque handle to the owner of a `Property`: a `Task` or a `Project` in
/// `kahmi-core`. Kept here (rather than a strong reference) so that a
/// property never keeps its owner alive, per `spec.md §3`'s invariant that
/// `owner` is a weak reference resolved through an arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OwnerId {
    Task(u64),
    Project(u64),
}
