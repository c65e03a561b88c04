//! Topology - 2D mesh of clusters
//!
//! Clusters sit on an `x_size * y_size` mesh; cluster `(x, y)` has id
//! `x * y_size + y`. Distance is the Manhattan hop count between routers.

use alloc::vec;
use alloc::vec::Vec;

use super::ClusterId;
use crate::boot::BootError;
use crate::config::{CLUSTER_NR_MAX, CPU_PER_CLUSTER_MAX};

/// Hardware topology descriptor handed over by the boot loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    x_size: u8,
    y_size: u8,
    /// CPU count of every cluster, indexed by cluster id
    cpus: Vec<u8>,
}

/// Inclusive rectangle of mesh coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRegion {
    pub x0: u8,
    pub y0: u8,
    pub x1: u8,
    pub y1: u8,
}

impl MeshRegion {
    pub const fn point(x: u8, y: u8) -> Self {
        Self { x0: x, y0: y, x1: x, y1: y }
    }

    pub fn contains(&self, x: u8, y: u8) -> bool {
        (self.x0..=self.x1).contains(&x) && (self.y0..=self.y1).contains(&y)
    }

    /// Hops from `(x, y)` to the closest point of the region
    pub fn distance_from(&self, x: u8, y: u8) -> u32 {
        let dx = if x < self.x0 {
            self.x0 - x
        } else if x > self.x1 {
            x - self.x1
        } else {
            0
        };
        let dy = if y < self.y0 {
            self.y0 - y
        } else if y > self.y1 {
            y - self.y1
        } else {
            0
        };
        dx as u32 + dy as u32
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

impl Topology {
    /// Homogeneous mesh with `cpus_per_cluster` CPUs everywhere
    pub fn mesh(x_size: u8, y_size: u8, cpus_per_cluster: u8) -> Self {
        let count = x_size as usize * y_size as usize;
        Self {
            x_size,
            y_size,
            cpus: vec![cpus_per_cluster; count],
        }
    }

    /// Mesh with an explicit CPU count per cluster
    pub fn with_cpus(x_size: u8, y_size: u8, cpus: Vec<u8>) -> Self {
        Self { x_size, y_size, cpus }
    }

    pub fn validate(&self) -> Result<(), BootError> {
        if self.x_size == 0 || self.y_size == 0 {
            return Err(BootError::UnknownTopology);
        }
        let count = self.x_size as usize * self.y_size as usize;
        if count > CLUSTER_NR_MAX {
            return Err(BootError::TooManyClusters { count, max: CLUSTER_NR_MAX });
        }
        if self.cpus.len() != count {
            return Err(BootError::UnknownTopology);
        }
        for (cid, &n) in self.cpus.iter().enumerate() {
            if n == 0 {
                return Err(BootError::EmptyCluster { cluster: cid as u16 });
            }
            if n as usize > CPU_PER_CLUSTER_MAX {
                return Err(BootError::TooManyCpus { cluster: cid as u16, count: n as usize });
            }
        }
        Ok(())
    }

    pub fn x_size(&self) -> u8 {
        self.x_size
    }

    pub fn y_size(&self) -> u8 {
        self.y_size
    }

    pub fn cluster_count(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu_count(&self, cluster: ClusterId) -> usize {
        self.cpus.get(cluster.index()).copied().unwrap_or(0) as usize
    }

    pub fn coords(&self, cluster: ClusterId) -> (u8, u8) {
        let y_size = self.y_size.max(1) as u16;
        ((cluster.0 / y_size) as u8, (cluster.0 % y_size) as u8)
    }

    pub fn cluster_at(&self, x: u8, y: u8) -> Option<ClusterId> {
        if x < self.x_size && y < self.y_size {
            Some(ClusterId(x as u16 * self.y_size as u16 + y as u16))
        } else {
            None
        }
    }

    /// Hop count between two clusters
    pub fn distance(&self, a: ClusterId, b: ClusterId) -> u32 {
        let (ax, ay) = self.coords(a);
        MeshRegion::point(ax, ay).distance_from(self.coords(b).0, self.coords(b).1)
    }

    /// Hop count from `from` to the closest cluster of `region`
    pub fn distance_to_region(&self, from: ClusterId, region: &MeshRegion) -> u32 {
        let (x, y) = self.coords(from);
        region.distance_from(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coords_and_distance() {
        let topo = Topology::mesh(2, 2, 4);
        assert_eq!(topo.coords(ClusterId(1)), (0, 1));
        assert_eq!(topo.coords(ClusterId(2)), (1, 0));
        assert_eq!(topo.distance(ClusterId(0), ClusterId(1)), 1);
        assert_eq!(topo.distance(ClusterId(0), ClusterId(2)), 1);
        assert_eq!(topo.distance(ClusterId(0), ClusterId(3)), 2);
        assert_eq!(topo.cluster_at(1, 1), Some(ClusterId(3)));
        assert_eq!(topo.cluster_at(2, 0), None);
    }

    #[test]
    fn test_validate() {
        assert!(Topology::mesh(4, 4, 4).validate().is_ok());
        assert_eq!(Topology::mesh(0, 4, 4).validate(), Err(BootError::UnknownTopology));
        assert_eq!(
            Topology::mesh(16, 16, 1).validate(),
            Err(BootError::TooManyClusters { count: 256, max: CLUSTER_NR_MAX })
        );
        assert_eq!(
            Topology::with_cpus(1, 2, vec![2, 0]).validate(),
            Err(BootError::EmptyCluster { cluster: 1 })
        );
        assert_eq!(
            Topology::mesh(1, 1, 9).validate(),
            Err(BootError::TooManyCpus { cluster: 0, count: 9 })
        );
    }

    #[test]
    fn test_region_distance() {
        let region = MeshRegion { x0: 2, y0: 2, x1: 3, y1: 3 };
        assert_eq!(region.distance_from(0, 0), 4);
        assert_eq!(region.distance_from(2, 3), 0);
        assert_eq!(region.distance_from(3, 5), 2);
    }
}
