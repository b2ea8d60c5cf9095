/*!
Dependency-tracked assignment evaluation.

Every [`Variable`] records the clock value at which it was last set, and every [`Assignment`]
the clock value at which it last ran. An assignment is dirty when any dependency was modified
at or after its last recomputation; only dirty assignments copy anything.

The [`Clock`] belongs to one loaded effect. When it runs out of values, every timestamp in the
effect is swept back to zero and counting restarts at one, so everything reads as dirty once
and no stale comparison survives the wraparound.
*/

use crate::arena::{Ref, Span};
use crate::graph::{Block, ConstantBuffer, Variable, element_bytes};
use crate::state::{BindingSlot, PassBindings};
use crate::types::ScalarKind;
use crate::value::ScalarValue;

/// Where an assignment writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// A field of the owning record, already offset for any per-target index.
    Field {
        offset: u32,
        scalar: ScalarKind,
        components: u32,
    },
    /// A pointer-valued slot of a pass.
    Binding(BindingSlot),
}

/// How an assignment produces its value.
///
/// Constant assignments are applied once while loading and never reach the runtime graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    DirectVariable {
        variable: Ref<Variable>,
    },
    ConstIndexed {
        array: Ref<Variable>,
        index: u32,
    },
    VariableIndexed {
        index: Ref<Variable>,
        array: Ref<Variable>,
    },
    /// Rebinds the destination slot to the indexed block of an object array.
    ObjectVariableIndexed {
        index: Ref<Variable>,
        blocks: Span<Block>,
    },
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub(crate) destination: Destination,
    pub(crate) source: Source,
    pub(crate) dependencies: Span<Ref<Variable>>,
    pub(crate) last_recomputed: u32,
}

/// Read-only state an assignment reads its sources from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sources<'a> {
    pub(crate) variables: &'a [Variable],
    pub(crate) buffers: &'a [ConstantBuffer],
    pub(crate) bytes: &'a [u8],
    pub(crate) dependencies: &'a [Ref<Variable>],
}

/// The record, and for passes the binding slots, an assignment may write.
#[derive(Debug)]
pub(crate) struct Target<'a> {
    pub(crate) record: &'a mut [u8],
    pub(crate) bindings: Option<&'a mut PassBindings<Ref<Block>>>,
}

impl Target<'_> {
    pub(crate) fn reborrow(&mut self) -> Target<'_> {
        Target {
            record: &mut *self.record,
            bindings: self.bindings.as_deref_mut(),
        }
    }
}

impl<'a> Sources<'a> {
    fn variable(&self, variable: Ref<Variable>) -> Option<&'a Variable> {
        self.variables.get(variable.index())
    }

    fn element(&self, variable: &Variable, element: u32) -> Option<&'a [u8]> {
        element_bytes(self.buffers, self.bytes, variable, element)
    }

    /// Current value of a scalar index variable.
    fn index_value(&self, variable: Ref<Variable>) -> Option<u32> {
        let variable = self.variable(variable)?;
        let scalar = variable.layout.scalar()?;
        ScalarValue::read(scalar, self.element(variable, 0)?).map(ScalarValue::as_u32)
    }
}

/// Out-of-range runtime indices select element 0 instead of failing.
fn clamp_index(index: u32, count: u32) -> u32 {
    if index >= count {
        logwise::debuginternal_sync!(
            "index {index} out of range for {count} elements, using 0",
            index = index,
            count = count
        );
        0
    } else {
        index
    }
}

impl Assignment {
    pub fn destination(&self) -> Destination {
        self.destination
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn last_recomputed(&self) -> u32 {
        self.last_recomputed
    }

    pub(crate) fn is_dirty(&self, sources: &Sources<'_>) -> bool {
        let Some(dependencies) = sources.dependencies.get(self.dependencies.range()) else {
            return false;
        };
        dependencies.iter().any(|dependency| {
            sources
                .variable(*dependency)
                .is_some_and(|variable| variable.last_modified >= self.last_recomputed)
        })
    }

    /// Recomputes the destination if any dependency changed since the last run.
    ///
    /// Returns whether anything was written.
    pub(crate) fn evaluate(&mut self, sources: &Sources<'_>, now: u32, target: Target<'_>) -> bool {
        if !self.is_dirty(sources) {
            return false;
        }
        let copied = self.copy(sources, target).is_some();
        self.last_recomputed = now;
        copied
    }

    fn copy(&self, sources: &Sources<'_>, target: Target<'_>) -> Option<()> {
        match (self.source, self.destination) {
            (Source::ObjectVariableIndexed { index, blocks }, Destination::Binding(slot)) => {
                let element = clamp_index(sources.index_value(index)?, blocks.len());
                target.bindings?.set(slot, blocks.get(element));
                Some(())
            }
            (
                source,
                Destination::Field {
                    offset,
                    scalar,
                    components,
                },
            ) => {
                let (array, element) = match source {
                    Source::DirectVariable { variable } => (variable, 0),
                    Source::ConstIndexed { array, index } => (array, index),
                    Source::VariableIndexed { index, array } => {
                        let count = sources.variable(array)?.layout.count();
                        (array, clamp_index(sources.index_value(index)?, count))
                    }
                    Source::ObjectVariableIndexed { .. } => return None,
                };
                let variable = sources.variable(array)?;
                let numeric = variable.layout.numeric()?;
                let bytes = sources.element(variable, element)?;
                let out = target.record.get_mut(offset as usize..)?;
                let width = scalar.component_size() as usize;
                for component in 0..components {
                    let at = numeric.component_offset(component) as usize;
                    let value = ScalarValue::read(numeric.scalar, bytes.get(at..)?)?;
                    value.write(scalar, out.get_mut(component as usize * width..)?)?;
                }
                Some(())
            }
            (_, Destination::Binding(_)) => None,
        }
    }
}

/// Evaluates `assignments` in order, reporting whether any of them wrote.
pub(crate) fn apply_assignments(
    assignments: &mut [Assignment],
    sources: &Sources<'_>,
    now: u32,
    mut target: Target<'_>,
) -> bool {
    let mut changed = false;
    for assignment in assignments {
        changed |= assignment.evaluate(sources, now, target.reborrow());
    }
    changed
}

/// The per-effect timestamp counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Clock {
    now: u32,
}

impl Clock {
    pub const fn starting_at(now: u32) -> Self {
        Clock { now }
    }

    pub const fn now(&self) -> u32 {
        self.now
    }

    /// Advances to the next tick.
    ///
    /// At the end of the counter's range every timestamp is reset to 0 and the clock restarts
    /// at 1, which makes every assignment dirty for its next evaluation.
    pub fn tick(&mut self, variables: &mut [Variable], assignments: &mut [Assignment]) -> u32 {
        if self.now == u32::MAX {
            for variable in variables {
                variable.last_modified = 0;
            }
            for assignment in assignments {
                assignment.last_recomputed = 0;
            }
            self.now = 1;
            logwise::info_sync!("effect clock rolled over");
        } else {
            self.now += 1;
        }
        self.now
    }
}

/// Whether `variable` is one of the assignment's dependencies, as a value or as an index.
pub(crate) fn depends_on(assignment: &Assignment, dependencies: &[Ref<Variable>], variable: Ref<Variable>) -> bool {
    dependencies
        .get(assignment.dependencies.range())
        .is_some_and(|deps| deps.contains(&variable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::VariableData;
    use crate::pool::StrRef;
    use crate::types::{Layout, NumericType, TypeDescriptor};

    /// One buffer holding an int `idx`, a `float4 arr[3]` and a float `val`.
    struct Fixture {
        variables: Vec<Variable>,
        buffers: Vec<ConstantBuffer>,
        bytes: Vec<u8>,
        dependencies: Vec<Ref<Variable>>,
    }

    const IDX: Ref<Variable> = Ref::new(0);
    const ARR: Ref<Variable> = Ref::new(1);
    const VAL: Ref<Variable> = Ref::new(2);

    fn layout(ty: NumericType, elements: u32) -> Layout {
        Layout::of(&TypeDescriptor::numeric(StrRef::from_index(0), ty, elements).unwrap())
    }

    impl Fixture {
        fn new() -> Self {
            let numeric = |layout, offset| Variable {
                layout,
                data: VariableData::Numeric {
                    buffer: Ref::new(0),
                    offset,
                },
                last_modified: 0,
            };
            let mut bytes = vec![0u8; 96];
            for element in 0..3u32 {
                for component in 0..4u32 {
                    let value = (element * 10 + component) as f32;
                    let at = (16 + element * 16 + component * 4) as usize;
                    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
                }
            }
            bytes[64..68].copy_from_slice(&42.5f32.to_le_bytes());
            Fixture {
                variables: vec![
                    numeric(layout(NumericType::scalar(ScalarKind::Int), 0), 0),
                    numeric(layout(NumericType::vector(ScalarKind::Float, 4), 3), 16),
                    numeric(layout(NumericType::scalar(ScalarKind::Float), 0), 64),
                ],
                buffers: vec![ConstantBuffer {
                    data: Span::new(0, 96),
                    variables: Span::new(0, 3),
                    bind_point: None,
                    dirty: false,
                }],
                bytes,
                dependencies: vec![ARR, IDX, ARR, VAL, IDX],
            }
        }

        fn sources(&self) -> Sources<'_> {
            Sources {
                variables: &self.variables,
                buffers: &self.buffers,
                bytes: &self.bytes,
                dependencies: &self.dependencies,
            }
        }

        fn set_index(&mut self, value: i32, now: u32) {
            self.bytes[0..4].copy_from_slice(&value.to_le_bytes());
            self.variables[0].last_modified = now;
        }
    }

    fn field(components: u32) -> Destination {
        Destination::Field {
            offset: 0,
            scalar: ScalarKind::Float,
            components,
        }
    }

    fn floats(record: &[u8]) -> Vec<f32> {
        record
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    fn run(assignment: &mut Assignment, fixture: &Fixture, now: u32, record: &mut [u8]) -> bool {
        assignment.evaluate(
            &fixture.sources(),
            now,
            Target {
                record,
                bindings: None,
            },
        )
    }

    #[test]
    fn second_evaluation_is_a_no_op() {
        let fixture = Fixture::new();
        let mut assignment = Assignment {
            destination: field(1),
            source: Source::DirectVariable { variable: VAL },
            dependencies: Span::new(3, 1),
            last_recomputed: 0,
        };
        let mut record = [0u8; 4];
        assert!(run(&mut assignment, &fixture, 1, &mut record));
        assert_eq!(floats(&record), vec![42.5]);
        record = [0; 4];
        assert!(!run(&mut assignment, &fixture, 2, &mut record));
        assert_eq!(record, [0; 4]);
        assert_eq!(assignment.last_recomputed, 1);
    }

    #[test]
    fn variable_index_clamps_to_zero() {
        let mut fixture = Fixture::new();
        let mut assignment = Assignment {
            destination: field(4),
            source: Source::VariableIndexed { index: IDX, array: ARR },
            dependencies: Span::new(0, 2),
            last_recomputed: 0,
        };
        let mut record = [0u8; 16];

        fixture.set_index(2, 0);
        assert!(run(&mut assignment, &fixture, 1, &mut record));
        assert_eq!(floats(&record), vec![20.0, 21.0, 22.0, 23.0]);

        fixture.set_index(5, 1);
        assert!(run(&mut assignment, &fixture, 2, &mut record));
        assert_eq!(floats(&record), vec![0.0, 1.0, 2.0, 3.0]);

        fixture.set_index(-1, 2);
        record = [0xAA; 16];
        assert!(run(&mut assignment, &fixture, 3, &mut record));
        assert_eq!(floats(&record), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn only_dependents_recompute() {
        let mut fixture = Fixture::new();
        let mut by_index = Assignment {
            destination: field(4),
            source: Source::VariableIndexed { index: IDX, array: ARR },
            dependencies: Span::new(0, 2),
            last_recomputed: 0,
        };
        let mut constant_index = Assignment {
            destination: field(2),
            source: Source::ConstIndexed { array: ARR, index: 1 },
            dependencies: Span::new(2, 1),
            last_recomputed: 0,
        };
        let mut first = [0u8; 16];
        let mut second = [0u8; 8];
        assert!(run(&mut by_index, &fixture, 1, &mut first));
        assert!(run(&mut constant_index, &fixture, 1, &mut second));
        assert_eq!(floats(&second), vec![10.0, 11.0]);

        fixture.set_index(1, 1);
        assert!(run(&mut by_index, &fixture, 2, &mut first));
        assert!(!run(&mut constant_index, &fixture, 2, &mut second));
        assert_eq!(floats(&first), vec![10.0, 11.0, 12.0, 13.0]);
        assert!(depends_on(&by_index, &fixture.dependencies, IDX));
        assert!(!depends_on(&constant_index, &fixture.dependencies, IDX));
    }

    #[test]
    fn object_index_rebinds_slot() {
        let mut fixture = Fixture::new();
        let mut assignment = Assignment {
            destination: Destination::Binding(BindingSlot::Rasterizer),
            source: Source::ObjectVariableIndexed {
                index: IDX,
                blocks: Span::new(4, 3),
            },
            dependencies: Span::new(4, 1),
            last_recomputed: 0,
        };
        let mut bindings = PassBindings::empty();
        let sources_then = |fixture: &Fixture, assignment: &mut Assignment, bindings: &mut PassBindings<Ref<Block>>, now| {
            assignment.evaluate(
                &fixture.sources(),
                now,
                Target {
                    record: &mut [],
                    bindings: Some(bindings),
                },
            )
        };
        fixture.set_index(2, 0);
        assert!(sources_then(&fixture, &mut assignment, &mut bindings, 1));
        assert_eq!(bindings.get(BindingSlot::Rasterizer), Some(Ref::new(6)));
        fixture.set_index(3, 1);
        assert!(sources_then(&fixture, &mut assignment, &mut bindings, 2));
        assert_eq!(bindings.get(BindingSlot::Rasterizer), Some(Ref::new(4)));
    }

    #[test]
    fn rollover_sweeps_every_timestamp() {
        let mut fixture = Fixture::new();
        let mut assignments = vec![Assignment {
            destination: field(1),
            source: Source::DirectVariable { variable: VAL },
            dependencies: Span::new(3, 1),
            last_recomputed: 0,
        }];
        let mut clock = Clock::starting_at(u32::MAX - 1);
        let now = clock.tick(&mut fixture.variables, &mut assignments);
        assert_eq!(now, u32::MAX);
        let mut record = [0u8; 4];
        assert!(run(&mut assignments[0], &fixture, now, &mut record));
        assert!(!run(&mut assignments[0], &fixture, now, &mut record));
        fixture.variables[1].last_modified = 77;

        let now = clock.tick(&mut fixture.variables, &mut assignments);
        assert_eq!(now, 1);
        assert!(fixture.variables.iter().all(|v| v.last_modified == 0));
        assert_eq!(assignments[0].last_recomputed, 0);
        assert!(run(&mut assignments[0], &fixture, now, &mut record));
        assert_eq!(assignments[0].last_recomputed, 1);
    }
}
