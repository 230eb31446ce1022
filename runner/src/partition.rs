use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("Cannot split {items} files on {groups} jobs")]
    InsufficientItems { items: usize, groups: usize },
    #[error("The number of jobs must be at least 1")]
    NoGroups,
}

/// Split `items` into `groups` contiguous slices whose sizes differ by at most one.
///
/// The first `items.len() % groups` slices receive the extra element, order is kept
/// within and across slices so concatenating the result yields `items` again.
pub fn split<T: Clone>(items: &[T], groups: usize) -> Result<Vec<Vec<T>>, PartitionError> {
    if groups == 0 {
        return Err(PartitionError::NoGroups);
    }

    if items.len() < groups {
        return Err(PartitionError::InsufficientItems {
            items: items.len(),
            groups,
        });
    }

    let base = items.len() / groups;
    let remainder = items.len() % groups;
    let mut offset = 0;

    Ok((0..groups)
        .map(|index| {
            let size = if index < remainder { base + 1 } else { base };
            let group = items[offset..offset + size].to_vec();
            offset += size;

            group
        })
        .collect())
}
