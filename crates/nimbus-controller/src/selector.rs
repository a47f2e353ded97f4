//! Worker selection by region affinity. The global domain is subdivided
//! into one rectangular cell per worker from a fixed split table; a job
//! goes to the worker whose cell overlaps the most of the job's data.

use log::info;
use nimbus_common::geometry::GeometricRegion;
use nimbus_common::id::WorkerId;

use crate::error::{ControllerError, ControllerResult};

/// workers -> (nx, ny, nz) subdivisions of the domain.
fn split_factors(workers: usize) -> ControllerResult<(i64, i64, i64)> {
    match workers {
        1 => Ok((1, 1, 1)),
        2 => Ok((1, 2, 1)),
        3 => Ok((1, 3, 1)),
        4 => Ok((2, 2, 1)),
        5 => Ok((1, 5, 1)),
        6 => Ok((2, 3, 1)),
        7 => Ok((1, 7, 1)),
        8 => Ok((2, 2, 2)),
        other => Err(ControllerError::UnsupportedClusterSize(other)),
    }
}

#[derive(Debug)]
pub struct WorkerSelector {
    domain: GeometricRegion,
    /// One cell per worker, ascending by worker id so ties resolve to the
    /// lowest id.
    cells: Vec<(WorkerId, GeometricRegion)>,
}

impl WorkerSelector {
    pub fn new(domain: GeometricRegion) -> Self {
        Self {
            domain,
            cells: Vec::new(),
        }
    }

    /// Recomputes the worker-to-subdomain assignment. Called only when
    /// the worker count changes.
    pub fn rebuild(&mut self, workers: &[WorkerId]) -> ControllerResult<()> {
        let mut ids = workers.to_vec();
        ids.sort();
        ids.dedup();
        let (nx, ny, nz) = split_factors(ids.len())?;

        let mut cells = Vec::with_capacity(ids.len());
        let mut next = ids.iter();
        for iz in 0..nz {
            for iy in 0..ny {
                for ix in 0..nx {
                    let cell = GeometricRegion::new(
                        self.domain.x + ix * (self.domain.dx / nx),
                        self.domain.y + iy * (self.domain.dy / ny),
                        self.domain.z + iz * (self.domain.dz / nz),
                        chunk(self.domain.dx, nx, ix),
                        chunk(self.domain.dy, ny, iy),
                        chunk(self.domain.dz, nz, iz),
                    );
                    let id = *next.next().expect("one worker per cell");
                    cells.push((id, cell));
                }
            }
        }
        info!("domain split into {}x{}x{} cells for {} workers", nx, ny, nz, ids.len());
        self.cells = cells;
        Ok(())
    }

    /// The worker whose cell intersects the most of the given regions;
    /// ties break to the lowest worker id. `None` before any rebuild.
    pub fn select(&self, regions: &[GeometricRegion]) -> Option<WorkerId> {
        let mut best: Option<(WorkerId, usize)> = None;
        for (id, cell) in &self.cells {
            let count = regions.iter().filter(|r| r.intersects(cell)).count();
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((*id, count)),
            }
        }
        best.map(|(id, _)| id)
    }
}

fn chunk(extent: i64, parts: i64, index: i64) -> i64 {
    let width = extent / parts;
    if index == parts - 1 {
        extent - index * width
    } else {
        width
    }
}
