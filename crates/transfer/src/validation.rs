use std::path::{Component, Path};

use crate::TransferError;

/// Longest name most filesystems accept for a single entry.
const MAX_NAME_BYTES: usize = 255;

/// Checks that a peer-supplied file name is one plain path component.
///
/// The receiver joins this name onto its storage directory, so anything that
/// could resolve elsewhere (separators, `..`, drive prefixes, NUL) is refused.
pub fn validate_file_name(name: &str) -> Result<(), TransferError> {
    let reject = |why: &str| Err(TransferError::InvalidPath(format!("{why}: {name:?}")));

    if name.is_empty() {
        return reject("empty file name");
    }
    if name.len() > MAX_NAME_BYTES {
        return reject("file name too long");
    }
    if name.contains('\0') {
        return reject("NUL in file name");
    }
    // Both separators, whatever the host platform.
    if name.contains(['/', '\\']) {
        return reject("file name contains a path separator");
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir | Component::CurDir), _) => {
            reject("file name refers to a directory")
        }
        _ => reject("file name is not a single component"),
    }
}
