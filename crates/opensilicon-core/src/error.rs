use thiserror::Error;
use uuid::Uuid;

use crate::cell::CellId;
use crate::layer::LayerId;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Unknown cell {0}")]
    UnknownCell(CellId),

    #[error("Unknown instance {instance} in cell {cell}")]
    UnknownInstance { cell: CellId, instance: Uuid },

    #[error("Layer {0} is outside the supported range")]
    LayerOutOfRange(LayerId),

    #[error("Placing {child} inside {parent} would create a cycle")]
    CycleDetected { parent: CellId, child: CellId },

    #[error("Hierarchy below {cell} is deeper than {depth} levels")]
    HierarchyTooDeep { cell: CellId, depth: usize },

    #[error("Cell {0} is still placed in another cell")]
    CellInUse(CellId),
}
