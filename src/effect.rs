// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A loaded effect: its runtime graph, its optional reflection data and its clock.

An [`Effect`] is built in two phases. The loader walks the container into a growable scratch
image, then compaction moves every category into one fixed allocation. Cloning rebuilds a
scratch image from the compacted graph and runs the same compaction, so a clone shares nothing
with its original.
*/

mod clone;
mod compact;
mod load;
mod scratch;
mod variable;

use crate::arena::{Ref, Span};
use crate::block::PassState;
use crate::container::{FormatVersion, HeaderCounts};
use crate::error::{Error, Result};
use crate::evaluate::Clock;
use crate::graph::{Block, ConstantBuffer, Group, Pass, Runtime, Technique, Variable};
use crate::imp::{Backend, ObjectHandle};
use crate::reflection::Reflection;
use crate::types::Layout;

/// Knobs for [`Effect::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Keep names, types and annotations after loading.
    pub keep_reflection: bool,
    /// Deepest struct nesting accepted in a type record.
    pub max_type_depth: u32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            keep_reflection: true,
            max_type_depth: 32,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep_reflection(mut self, keep: bool) -> Self {
        self.keep_reflection = keep;
        self
    }

    pub fn max_type_depth(mut self, depth: u32) -> Self {
        self.max_type_depth = depth;
        self
    }
}

/// Bytes held by each arena of an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryReport {
    pub reflection_bytes: usize,
    pub runtime_bytes: usize,
}

impl MemoryReport {
    pub fn total(&self) -> usize {
        self.reflection_bytes.saturating_add(self.runtime_bytes)
    }
}

#[derive(Debug)]
pub struct Effect {
    format: FormatVersion,
    runtime: Runtime,
    reflection: Option<Reflection>,
    clock: Clock,
    memory: MemoryReport,
}

fn whole<T>(len: usize) -> Span<T> {
    // category lengths were checked against u32 during compaction
    Span::new(0, len as u32)
}

fn missing(what: &str, index: usize) -> Error {
    Error::argument(format!("no {what} at index {index}"))
}

impl Effect {
    /// Parses and compacts a container.
    ///
    /// Nothing partially loaded survives a failure.
    pub fn load(bytes: &[u8], options: &LoadOptions) -> Result<Effect> {
        let _guard = logwise::profile_begin!("Effect::load");
        let loaded = load::parse(bytes, options).and_then(|scratch| Effect::from_scratch(scratch, Clock::default()));
        match loaded {
            Ok(mut effect) => {
                if !options.keep_reflection {
                    effect.reflection = None;
                    effect.memory.reflection_bytes = 0;
                }
                logwise::info_sync!(
                    "loaded {format} effect ({runtime} runtime bytes, {reflection} reflection bytes)",
                    format = effect.format.name(),
                    runtime = effect.memory.runtime_bytes,
                    reflection = effect.memory.reflection_bytes
                );
                Ok(effect)
            }
            Err(error) => {
                logwise::warn_sync!("effect load failed: {error}", error = logwise::privacy::LogIt(&error));
                Err(error)
            }
        }
    }

    fn from_scratch(scratch: scratch::Scratch, clock: Clock) -> Result<Effect> {
        let format = scratch.format;
        let compacted = compact::compact(scratch)?;
        Ok(Effect {
            format,
            runtime: compacted.runtime,
            reflection: compacted.reflection,
            clock,
            memory: compacted.memory,
        })
    }

    /// An independent copy of this effect. The copy holds no backend objects.
    pub fn try_clone(&self) -> Result<Effect> {
        let _guard = logwise::profile_begin!("Effect::try_clone");
        let scratch = clone::rebuild(self.format, &self.runtime, self.reflection.as_ref())?;
        let effect = Effect::from_scratch(scratch, self.clock)?;
        logwise::info_sync!(
            "cloned effect ({bytes} bytes)",
            bytes = effect.memory.total()
        );
        Ok(effect)
    }

    /// Releases names, types and annotations. Evaluation is unaffected.
    pub fn drop_reflection(&mut self) {
        if self.reflection.take().is_some() {
            logwise::info_sync!(
                "dropped {bytes} bytes of reflection data",
                bytes = self.memory.reflection_bytes
            );
        }
        self.memory.reflection_bytes = 0;
    }

    pub fn memory_report(&self) -> MemoryReport {
        self.memory
    }

    pub fn reflection(&self) -> Result<&Reflection> {
        self.reflection.as_ref().ok_or(Error::ReflectionUnavailable)
    }

    pub fn has_reflection(&self) -> bool {
        self.reflection.is_some()
    }

    pub fn variable_by_name(&self, name: &str) -> Option<Ref<Variable>> {
        self.reflection.as_ref()?.variable_by_name(name)
    }

    pub fn technique_by_name(&self, name: &str) -> Option<Ref<Technique>> {
        self.reflection.as_ref()?.technique_by_name(name)
    }

    pub fn group_by_name(&self, name: &str) -> Option<Ref<Group>> {
        self.reflection.as_ref()?.group_by_name(name)
    }

    pub fn format(&self) -> FormatVersion {
        self.format
    }

    pub fn counts(&self) -> HeaderCounts {
        self.runtime.counts
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn groups(&self) -> Span<Group> {
        whole(self.runtime.groups.len())
    }

    pub fn techniques(&self) -> Span<Technique> {
        whole(self.runtime.techniques.len())
    }

    pub fn passes(&self) -> Span<Pass> {
        whole(self.runtime.passes.len())
    }

    pub fn variables(&self) -> Span<Variable> {
        whole(self.runtime.variables.len())
    }

    pub fn buffers(&self) -> Span<ConstantBuffer> {
        whole(self.runtime.buffers.len())
    }

    pub fn group_techniques(&self, group: Ref<Group>) -> Result<Span<Technique>> {
        self.runtime
            .groups
            .get(group.index())
            .map(|group| group.techniques)
            .ok_or_else(|| missing("group", group.index()))
    }

    pub fn technique_passes(&self, technique: Ref<Technique>) -> Result<Span<Pass>> {
        self.runtime
            .techniques
            .get(technique.index())
            .map(|technique| technique.passes)
            .ok_or_else(|| missing("technique", technique.index()))
    }

    fn buffer(&self, buffer: Ref<ConstantBuffer>) -> Result<&ConstantBuffer> {
        self.runtime
            .buffers
            .get(buffer.index())
            .ok_or_else(|| missing("constant buffer", buffer.index()))
    }

    pub fn buffer_variables(&self, buffer: Ref<ConstantBuffer>) -> Result<Span<Variable>> {
        Ok(self.buffer(buffer)?.variables)
    }

    pub fn buffer_bind_point(&self, buffer: Ref<ConstantBuffer>) -> Result<Option<u32>> {
        Ok(self.buffer(buffer)?.bind_point)
    }

    /// Whether the buffer holds bytes the backend has not received yet.
    pub fn is_buffer_dirty(&self, buffer: Ref<ConstantBuffer>) -> Result<bool> {
        Ok(self.buffer(buffer)?.dirty)
    }

    /// Current backing bytes of a constant buffer.
    pub fn buffer_bytes(&self, buffer: Ref<ConstantBuffer>) -> Result<&[u8]> {
        let span = self.buffer(buffer)?.data;
        self.runtime
            .buffer_bytes
            .get(span.range())
            .ok_or_else(|| Error::inconsistency("constant buffer outside its bytes"))
    }

    pub(crate) fn variable(&self, variable: Ref<Variable>) -> Result<&Variable> {
        self.runtime
            .variable(variable)
            .ok_or_else(|| missing("variable", variable.index()))
    }

    pub fn variable_layout(&self, variable: Ref<Variable>) -> Result<Layout> {
        Ok(self.variable(variable)?.layout)
    }

    pub fn last_modified(&self, variable: Ref<Variable>) -> Result<u32> {
        Ok(self.variable(variable)?.last_modified)
    }

    /// The block backing `element` of a state or shader variable.
    pub fn object_block(&self, variable: Ref<Variable>, element: u32) -> Result<Ref<Block>> {
        let blocks = self
            .variable(variable)?
            .data
            .blocks()
            .ok_or_else(|| Error::argument("variable is not an object variable"))?;
        blocks
            .get(element)
            .ok_or_else(|| Error::argument(format!("object variable has no block for element {element}")))
    }

    pub fn block(&self, block: Ref<Block>) -> Result<&Block> {
        self.runtime
            .blocks
            .get(block.index())
            .ok_or_else(|| missing("block", block.index()))
    }

    pub fn block_handle(&self, block: Ref<Block>) -> Result<Option<ObjectHandle>> {
        Ok(self.block(block)?.handle)
    }

    pub fn is_block_valid(&self, block: Ref<Block>) -> Result<bool> {
        Ok(self.block(block)?.valid)
    }

    fn pass(&self, pass: Ref<Pass>) -> Result<&Pass> {
        self.runtime
            .passes
            .get(pass.index())
            .ok_or_else(|| missing("pass", pass.index()))
    }

    /// Validity as of the last time the pass was applied.
    pub fn is_pass_valid(&self, pass: Ref<Pass>) -> Result<bool> {
        Ok(self.pass(pass)?.valid)
    }

    pub fn is_technique_valid(&self, technique: Ref<Technique>) -> Result<bool> {
        let passes = self.technique_passes(technique)?;
        for pass in passes.iter() {
            if !self.is_pass_valid(pass)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Ticks the clock and applies one pass through `backend`.
    pub fn apply_pass<B: Backend + ?Sized>(&mut self, pass: Ref<Pass>, backend: &mut B) -> Result<PassState> {
        self.pass(pass)?;
        let now = self.clock.tick(&mut self.runtime.variables, &mut self.runtime.assignments);
        self.runtime.apply_pass(pass, now, backend)
    }

    /// Applies every pass of a technique and reports whether all of them are valid.
    pub fn prepare_technique<B: Backend + ?Sized>(&mut self, technique: Ref<Technique>, backend: &mut B) -> Result<bool> {
        let mut valid = true;
        for pass in self.technique_passes(technique)?.iter() {
            valid &= self.apply_pass(pass, backend)?.valid;
        }
        Ok(valid)
    }

    /// Brings the block behind `element` of a state or shader variable up to date, for objects
    /// such as samplers that are used outside of any pass.
    pub fn apply_object<B: Backend + ?Sized>(
        &mut self,
        variable: Ref<Variable>,
        element: u32,
        backend: &mut B,
    ) -> Result<Option<ObjectHandle>> {
        let block = self.object_block(variable, element)?;
        let now = self.clock.tick(&mut self.runtime.variables, &mut self.runtime.assignments);
        self.runtime.refresh_object(block, now, backend)
    }

    /// Returns every backend object. The next apply recreates what it needs.
    pub fn release_objects<B: Backend + ?Sized>(&mut self, backend: &mut B) {
        self.runtime.release_objects(backend);
    }

    pub(crate) fn touch(&mut self, variable: Ref<Variable>) {
        self.runtime.touch(variable, self.clock.now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::builder::{BufferSpec, ContainerBuilder, TechniqueSpec, VariableSpec};
    use crate::types::{NumericType, ScalarKind};

    fn container() -> Vec<u8> {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx4_1);
        let float = builder.numeric_type("float", NumericType::scalar(ScalarKind::Float), 0).unwrap();
        builder.constant_buffer(BufferSpec::new("cb", 16).variable(VariableSpec::new("x", float, 0)));
        builder.technique(TechniqueSpec::new("t"));
        builder.finish().unwrap()
    }

    #[test]
    fn dropping_reflection_keeps_evaluation_state() {
        let mut effect = Effect::load(&container(), &LoadOptions::default()).unwrap();
        let x = effect.variable_by_name("x").unwrap();
        let before = effect.memory_report();
        assert!(before.reflection_bytes > 0);
        effect.drop_reflection();
        assert_eq!(effect.memory_report().reflection_bytes, 0);
        assert_eq!(effect.memory_report().runtime_bytes, before.runtime_bytes);
        assert!(effect.variable_by_name("x").is_none());
        assert!(matches!(effect.reflection(), Err(Error::ReflectionUnavailable)));
        effect.set_float(x, 2.0).unwrap();
        assert_eq!(effect.get_float(x).unwrap(), 2.0);
    }

    #[test]
    fn reflection_can_be_skipped_at_load() {
        let effect = Effect::load(&container(), &LoadOptions::new().keep_reflection(false)).unwrap();
        assert!(!effect.has_reflection());
        assert_eq!(effect.memory_report().total(), effect.memory_report().runtime_bytes);
        assert_eq!(effect.techniques().len(), 1);
        assert_eq!(effect.format(), FormatVersion::Fx4_1);
    }

    #[test]
    fn truncated_container_fails_cleanly() {
        let bytes = container();
        for len in [0, 10, bytes.len() - 1] {
            assert!(Effect::load(&bytes[..len], &LoadOptions::default()).is_err());
        }
    }
}
