//! Spin clusters and the cluster loop.

use serde::{Deserialize, Serialize};

/// A named group of spins sharing exchange parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub spin_ids: Vec<String>,
}

/// An immutable view of one fitting unit, as yielded by the cluster loop.
///
/// Free spins, which belong to no cluster, form single spin descriptors named
/// after the spin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescriptor {
    pub id: String,
    /// Indices into the session spin list, in cluster order.
    pub spin_indices: Vec<usize>,
    pub spin_ids: Vec<String>,
}

impl ClusterDescriptor {
    pub fn len(&self) -> usize {
        self.spin_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spin_indices.is_empty()
    }
}

/// Iterator over the cluster descriptors of a session.
///
/// The descriptors are derived up front so the iterator holds no borrow of the
/// session and can be re-created on every pass.
#[derive(Debug, Clone)]
pub struct ClusterIter {
    inner: std::vec::IntoIter<ClusterDescriptor>,
}

impl ClusterIter {
    pub(crate) fn new(descriptors: Vec<ClusterDescriptor>) -> Self {
        Self {
            inner: descriptors.into_iter(),
        }
    }
}

impl Iterator for ClusterIter {
    type Item = ClusterDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for ClusterIter {}
