mod basic_types;
mod heap;
mod instruction;

pub use basic_types::{Address, Ai, CodeAddress, Label, LabelTable, Signature};
pub use heap::Cell;
pub use instruction::Instruction;

use basic_types::OptionDisplay;
use heap::Heap;

/// Capacity bounds for the machine's memory areas.
///
/// Exceeding any bound surfaces as an explicit [`ExecutionError`] rather than
/// unchecked growth.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub heap_cells: usize,
    pub trail_entries: usize,
    pub frames: usize,
    pub choice_points: usize,
    pub registers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            heap_cells: 4096,
            trail_entries: 4096,
            frames: 256,
            choice_points: 256,
            registers: 32,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("address {address} is above the heap's allocation pointer ({top})")]
    AddressOutOfRange { address: Address, top: usize },
    #[error("heap capacity of {capacity} cells is exhausted")]
    HeapExhausted { capacity: usize },
    #[error("trail capacity of {capacity} entries is exhausted")]
    TrailExhausted { capacity: usize },
    #[error("environment stack capacity of {capacity} frames is exhausted")]
    TooManyFrames { capacity: usize },
    #[error("choice point capacity of {capacity} is exhausted")]
    TooManyChoicePoints { capacity: usize },
    #[error("deallocate with no open environment frame")]
    EmptyFrameStack,
    #[error("retry/trust with no live choice point")]
    NoChoicePoint,
    #[error("register {0} is out of range")]
    RegisterOutOfRange(Ai),
    #[error("register {0} holds no value")]
    EmptyRegister(Ai),
}

/// The verdict of a run: the query either succeeded or ran out of
/// alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
struct RegisterBlock(Box<[Option<Cell>]>);

impl RegisterBlock {
    fn new(count: usize) -> Self {
        Self(vec![None; count].into_boxed_slice())
    }

    fn load(&self, ai: Ai) -> Result<&Cell, ExecutionError> {
        self.0
            .get(ai.index())
            .ok_or(ExecutionError::RegisterOutOfRange(ai))?
            .as_ref()
            .ok_or(ExecutionError::EmptyRegister(ai))
    }

    fn get(&self, ai: Ai) -> Option<&Cell> {
        self.0.get(ai.index())?.as_ref()
    }

    fn store(&mut self, ai: Ai, cell: Cell) -> Result<(), ExecutionError> {
        *self
            .0
            .get_mut(ai.index())
            .ok_or(ExecutionError::RegisterOutOfRange(ai))? = Some(cell);
        Ok(())
    }

    fn clear(&mut self) {
        self.0.fill(None);
    }
}

/// An environment frame, recording the caller's continuation.
#[derive(Debug, Clone, Copy)]
struct Frame {
    continuation: Option<CodeAddress>,
}

/// A snapshot of the machine taken by try_me_else. The register block is a
/// deep copy; it shares no mutable state with the live register file.
struct ChoicePoint {
    retry: CodeAddress,
    continuation: Option<CodeAddress>,
    frame_depth: usize,
    trail_mark: usize,
    heap_top: usize,
    registers: RegisterBlock,
}

enum Step {
    Continue,
    Halt,
}

enum Operand {
    Variable(Address),
    Value(Option<Address>, Cell),
}

pub struct Machine {
    code: Vec<Instruction>,
    labels: LabelTable,
    heap: Heap,
    registers: RegisterBlock,
    frames: Vec<Frame>,
    frame_depth: usize,
    choice_points: Vec<ChoicePoint>,
    pc: Option<CodeAddress>,
    cp: Option<CodeAddress>,
    fail: bool,
    limits: Limits,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(Limits::default())
    }
}

impl Machine {
    pub fn new(limits: Limits) -> Self {
        Self {
            code: Vec::new(),
            labels: LabelTable::new(),
            heap: Heap::new(limits.heap_cells, limits.trail_entries),
            registers: RegisterBlock::new(limits.registers),
            frames: Vec::new(),
            frame_depth: 0,
            choice_points: Vec::new(),
            pc: Some(CodeAddress(0)),
            cp: None,
            fail: false,
            limits,
        }
    }

    /// Loads a fresh code image and resets all execution state.
    pub fn load(&mut self, code: Vec<Instruction>, labels: LabelTable) {
        self.code = code;
        self.labels = labels;
        self.heap.clear();
        self.registers.clear();
        self.frames.clear();
        self.frame_depth = 0;
        self.choice_points.clear();
        self.pc = Some(CodeAddress(0));
        self.cp = None;
        self.fail = false;
    }

    /// Whether untried alternatives remain after the last verdict.
    pub fn has_choices(&self) -> bool {
        !self.choice_points.is_empty()
    }

    /// Runs the loaded image to its first verdict.
    pub fn run(&mut self) -> Result<RunOutcome, ExecutionError> {
        self.resume()
    }

    /// Forces backtracking into the remaining alternatives and resumes the
    /// loop. Pull-based and forward-only: there is no way back past a redo.
    pub fn next_solution(&mut self) -> Result<RunOutcome, ExecutionError> {
        self.fail = true;
        self.resume()
    }

    fn resume(&mut self) -> Result<RunOutcome, ExecutionError> {
        loop {
            if self.fail && !self.backtrack() {
                return Ok(RunOutcome::Failure);
            }

            let Some(pc) = self.pc else {
                return Ok(RunOutcome::Success);
            };
            let Some(instruction) = self.code.get(pc.index()).cloned() else {
                return Ok(RunOutcome::Success);
            };
            self.pc = Some(pc.next());

            log::trace!("@{pc}: {instruction}");

            if let Step::Halt = self.execute(&instruction)? {
                return Ok(RunOutcome::Success);
            }
        }
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<Step, ExecutionError> {
        match instruction {
            Instruction::PutConstant { ai, name } => {
                self.registers.store(*ai, Cell::Constant(name.clone()))?;
            }
            Instruction::PutVariable { ai } => {
                let address = self.heap.push(Cell::Unbound)?;
                self.registers.store(*ai, Cell::Reference(address))?;
            }
            Instruction::PutValue { ai, source } => {
                let cell = self.registers.load(*source)?.clone();
                self.registers.store(*ai, cell)?;
            }
            // Structure arguments are neither built nor matched; the register
            // carries the signature and unification compares signatures only.
            Instruction::PutStructure { ai, signature }
            | Instruction::GetStructure { ai, signature } => {
                self.registers
                    .store(*ai, Cell::Structure(signature.clone()))?;
            }
            Instruction::GetConstant { ai, name } => {
                let cell = self.registers.load(*ai)?.clone();
                if !self.unify(cell, Cell::Constant(name.clone()))? {
                    self.fail = true;
                }
            }
            Instruction::GetVariable { ai } => {
                if self.registers.get(*ai).is_none() {
                    self.fail = true;
                }
            }
            Instruction::GetValue { ai, source } => {
                let left = self.registers.load(*ai)?.clone();
                let right = self.registers.load(*source)?.clone();
                if !self.unify(left, right)? {
                    self.fail = true;
                }
            }
            Instruction::Call { label } => match self.labels.get(label) {
                Some(&target) => {
                    self.cp = self.pc;
                    self.pc = Some(target);
                }
                None => {
                    log::warn!("call to unknown label {label}");
                    self.fail = true;
                }
            },
            Instruction::Proceed => {
                log::trace!("proceeding to {}", OptionDisplay(self.cp));
                match self.cp {
                    None => return Ok(Step::Halt),
                    Some(target) => self.pc = Some(target),
                }
            }
            Instruction::Allocate => self.allocate()?,
            Instruction::Deallocate => self.deallocate()?,
            Instruction::Halt => return Ok(Step::Halt),
            Instruction::TryMeElse { label } => self.try_me_else(label)?,
            Instruction::RetryMeElse { label } => self.retry_me_else(label)?,
            Instruction::TrustMe => {
                self.choice_points
                    .pop()
                    .ok_or(ExecutionError::NoChoicePoint)?;
            }
        }

        Ok(Step::Continue)
    }

    fn allocate(&mut self) -> Result<(), ExecutionError> {
        if self.frame_depth == self.limits.frames {
            return Err(ExecutionError::TooManyFrames {
                capacity: self.limits.frames,
            });
        }

        let frame = Frame {
            continuation: self.cp,
        };
        if self.frame_depth == self.frames.len() {
            self.frames.push(frame);
        } else {
            self.frames[self.frame_depth] = frame;
        }
        self.frame_depth += 1;

        Ok(())
    }

    fn deallocate(&mut self) -> Result<(), ExecutionError> {
        let depth = self
            .frame_depth
            .checked_sub(1)
            .ok_or(ExecutionError::EmptyFrameStack)?;
        self.frame_depth = depth;
        self.cp = self.frames[depth].continuation;
        self.pc = self.cp;

        Ok(())
    }

    fn try_me_else(&mut self, label: &Label) -> Result<(), ExecutionError> {
        let Some(&retry) = self.labels.get(label) else {
            log::warn!("try_me_else with unknown label {label}");
            self.fail = true;
            return Ok(());
        };

        if self.choice_points.len() == self.limits.choice_points {
            return Err(ExecutionError::TooManyChoicePoints {
                capacity: self.limits.choice_points,
            });
        }

        self.choice_points.push(ChoicePoint {
            retry,
            continuation: self.cp,
            frame_depth: self.frame_depth,
            trail_mark: self.heap.trail_mark(),
            heap_top: self.heap.top(),
            registers: self.registers.clone(),
        });

        Ok(())
    }

    fn retry_me_else(&mut self, label: &Label) -> Result<(), ExecutionError> {
        let Some(&retry) = self.labels.get(label) else {
            log::warn!("retry_me_else with unknown label {label}");
            self.fail = true;
            return Ok(());
        };

        self.choice_points
            .last_mut()
            .ok_or(ExecutionError::NoChoicePoint)?
            .retry = retry;

        Ok(())
    }

    /// Restores the machine to the most recent choice point, or reports
    /// terminal failure if none remain. The choice point is peeked, not
    /// popped: only trust_me or a retry_me_else rewrite consumes it.
    fn backtrack(&mut self) -> bool {
        let Some(point) = self.choice_points.last() else {
            return false;
        };

        log::debug!("backtracking to @{}", point.retry);

        self.pc = Some(point.retry);
        self.cp = point.continuation;
        self.frame_depth = point.frame_depth;
        self.registers = point.registers.clone();
        self.heap.rewind(point.heap_top);
        let trail_mark = point.trail_mark;
        self.heap.unwind_to(trail_mark);
        self.fail = false;

        true
    }

    fn resolve(&self, cell: Cell) -> Result<Operand, ExecutionError> {
        match cell {
            Cell::Reference(address) => {
                let representative = self.heap.deref(address)?;
                match self.heap.get(representative)? {
                    Cell::Unbound => Ok(Operand::Variable(representative)),
                    value => Ok(Operand::Value(Some(representative), value.clone())),
                }
            }
            value => Ok(Operand::Value(None, value)),
        }
    }

    /// Heap-level unification. Returns whether the operands were made
    /// identical; every binding is trailed so backtracking can undo it.
    fn unify(&mut self, left: Cell, right: Cell) -> Result<bool, ExecutionError> {
        match (self.resolve(left)?, self.resolve(right)?) {
            (Operand::Variable(a), Operand::Variable(b)) => {
                if a != b {
                    self.heap.bind(a, b)?;
                }
                Ok(true)
            }
            (Operand::Variable(variable), Operand::Value(address, value))
            | (Operand::Value(address, value), Operand::Variable(variable)) => {
                let target = match address {
                    Some(address) => address,
                    None => self.heap.push(value)?,
                };
                self.heap.bind(variable, target)?;
                Ok(true)
            }
            (Operand::Value(a, left), Operand::Value(b, right)) => {
                if a.is_some() && a == b {
                    return Ok(true);
                }

                Ok(match (left, right) {
                    (Cell::Constant(left), Cell::Constant(right)) => left == right,
                    (Cell::Structure(left), Cell::Structure(right)) => left == right,
                    _ => false,
                })
            }
        }
    }

    /// The concrete value a heap cell resolved to, if any. Query variables
    /// live at known entry-sequence addresses; the driver inspects them
    /// through this after a successful run.
    pub fn heap_value(&self, address: Address) -> Option<Cell> {
        let representative = self.heap.deref(address).ok()?;
        match self.heap.get(representative).ok()? {
            Cell::Unbound => None,
            value => Some(value.clone()),
        }
    }

    /// The concrete value a register resolved to, if any.
    pub fn register_value(&self, ai: Ai) -> Option<Cell> {
        match self.registers.get(ai)? {
            Cell::Reference(address) => {
                let representative = self.heap.deref(*address).ok()?;
                match self.heap.get(representative).ok()? {
                    Cell::Unbound => None,
                    value => Some(value.clone()),
                }
            }
            value => Some(value.clone()),
        }
    }
}
