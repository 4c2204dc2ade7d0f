//! Dispatch parameters

use std::fmt;

/// Identifier minted by every successful dispatch of a compute shader
///
/// Ids start at 1 and increase by one per dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {}", self.0)
    }
}

/// Three-dimensional index space of a dispatch
///
/// Lower-dimensional ranges set the unused extents to 1.
///
/// ```
/// use shader_dispatch::NdRange;
///
/// let range = NdRange::from([64, 32]).with_local([8, 8, 1]);
/// assert_eq!(range.global, [64, 32, 1]);
/// assert_eq!(range.local, [8, 8, 1]);
/// assert_eq!(range.offset, [0, 0, 0]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NdRange {
    pub global: [usize; 3],
    pub local: [usize; 3],
    pub offset: [usize; 3],
}

impl NdRange {
    pub const fn new(global: [usize; 3]) -> Self {
        Self {
            global,
            local: [1, 1, 1],
            offset: [0, 0, 0],
        }
    }

    pub const fn with_local(mut self, local: [usize; 3]) -> Self {
        self.local = local;
        self
    }

    pub const fn with_offset(mut self, offset: [usize; 3]) -> Self {
        self.offset = offset;
        self
    }

    /// Total number of work items
    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }
}

impl From<usize> for NdRange {
    fn from(x: usize) -> Self {
        Self::new([x, 1, 1])
    }
}

impl From<[usize; 1]> for NdRange {
    fn from([x]: [usize; 1]) -> Self {
        Self::new([x, 1, 1])
    }
}

impl From<[usize; 2]> for NdRange {
    fn from([x, y]: [usize; 2]) -> Self {
        Self::new([x, y, 1])
    }
}

impl From<[usize; 3]> for NdRange {
    fn from(global: [usize; 3]) -> Self {
        Self::new(global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lower_dimensions_pad_with_one() {
        assert_eq!(NdRange::from(8).global, [8, 1, 1]);
        assert_eq!(NdRange::from([8]).global, [8, 1, 1]);
        assert_eq!(NdRange::from([8, 4]).global, [8, 4, 1]);
        assert_eq!(NdRange::from([4, 4, 4]).work_items(), 64);
    }

    #[test]
    fn test_session_ordering() {
        assert!(SessionId(1) < SessionId(2));
        assert_eq!(SessionId(3).to_string(), "session 3");
    }
}
