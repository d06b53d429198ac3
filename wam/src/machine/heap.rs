use core::fmt;

use arcstr::ArcStr;

use super::basic_types::{Address, Signature};
use super::ExecutionError;

/// A tagged heap cell.
///
/// `Unbound` is an explicit variant rather than a reference whose pointer
/// happens to equal its own address, so snapshot/restore code cannot
/// accidentally alias it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// An unbound variable
    Unbound,
    /// A link in a dereference chain
    Reference(Address),
    /// An atom
    Constant(ArcStr),
    /// A compound term, matched by signature only
    Structure(Signature),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Unbound => write!(f, "_"),
            Cell::Reference(address) => write!(f, "_{address}"),
            Cell::Constant(name) => write!(f, "{name}"),
            Cell::Structure(signature) => write!(f, "{signature}"),
        }
    }
}

/// The heap plus the trail of bindings to undo on backtracking.
///
/// The allocation pointer only moves forwards during execution. Backtracking
/// rewinds it without shrinking the underlying storage, so cells above the
/// pointer stay allocated but unreachable; touching one is an address error.
pub struct Heap {
    cells: Vec<Cell>,
    top: usize,
    trail: Vec<Address>,
    cell_capacity: usize,
    trail_capacity: usize,
}

impl Heap {
    pub fn new(cell_capacity: usize, trail_capacity: usize) -> Self {
        Self {
            cells: Vec::new(),
            top: 0,
            trail: Vec::new(),
            cell_capacity,
            trail_capacity,
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.top = 0;
        self.trail.clear();
    }

    /// The current allocation pointer.
    pub fn top(&self) -> usize {
        self.top
    }

    pub fn push(&mut self, cell: Cell) -> Result<Address, ExecutionError> {
        if self.top == self.cell_capacity {
            return Err(ExecutionError::HeapExhausted {
                capacity: self.cell_capacity,
            });
        }

        let address = Address(self.top as u16);
        if self.top == self.cells.len() {
            self.cells.push(cell);
        } else {
            self.cells[self.top] = cell;
        }
        self.top += 1;

        Ok(address)
    }

    pub fn get(&self, address: Address) -> Result<&Cell, ExecutionError> {
        if address.index() >= self.top {
            return Err(ExecutionError::AddressOutOfRange {
                address,
                top: self.top,
            });
        }

        Ok(&self.cells[address.index()])
    }

    /// Follows reference chains to the representative cell's address.
    pub fn deref(&self, mut address: Address) -> Result<Address, ExecutionError> {
        loop {
            match self.get(address)? {
                Cell::Reference(next) => address = *next,
                _ => return Ok(address),
            }
        }
    }

    /// Binds an unbound cell, recording its address on the trail first.
    pub fn bind(&mut self, variable: Address, target: Address) -> Result<(), ExecutionError> {
        let cell = self.get(variable)?;
        debug_assert!(matches!(cell, Cell::Unbound), "bound cells are never re-bound");

        if self.trail.len() == self.trail_capacity {
            return Err(ExecutionError::TrailExhausted {
                capacity: self.trail_capacity,
            });
        }

        self.trail.push(variable);
        self.cells[variable.index()] = Cell::Reference(target);

        Ok(())
    }

    pub fn trail_mark(&self) -> usize {
        self.trail.len()
    }

    /// Unwinds the trail to `mark`, resetting each recorded cell to unbound.
    pub fn unwind_to(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some(address) = self.trail.pop() {
                self.cells[address.index()] = Cell::Unbound;
            }
        }
    }

    /// Rewinds the allocation pointer; cells above it become unreachable.
    pub fn rewind(&mut self, top: usize) {
        self.top = top;
    }
}
