/*! effect_runtime loads precompiled shader-effect containers and keeps their render state
current as application variables change.

A container describes constant buffers, variables, render-state blocks, shaders and a
group → technique → pass hierarchy. Loading it produces an [`Effect`]: a compact object graph
split into two arenas.

| Arena      | Holds                                                          | Needed for                |
|------------|----------------------------------------------------------------|---------------------------|
| Runtime    | buffers, variable layouts, blocks, assignments, passes         | evaluation                |
| Reflection | names, semantics, interned types and strings, annotations      | lookup and introspection  |

The reflection arena can be dropped once an application has resolved the handles it needs,
see [`Effect::drop_reflection`].

# Evaluation

Render-state blocks and passes own *assignments*: a destination field plus a source that is a
variable, an element of a variable array, or an element selected by another variable. Each
assignment remembers when it was last recomputed, each variable when it was last modified. On
[`Effect::apply_pass`] the effect's clock ticks and only assignments whose dependencies changed
since their last evaluation are recomputed. A block whose record changed is recreated through
the [`Backend`]; dirty constant buffers are uploaded.

```
# use effect_runtime::{ContainerBuilder, Effect, FormatVersion, LoadOptions, NopBackend};
# use effect_runtime::container::builder::{PassSpec, TechniqueSpec};
let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
builder.technique(TechniqueSpec::new("draw").pass(PassSpec::new("p0")));
let bytes = builder.finish().unwrap();

let mut effect = Effect::load(&bytes, &LoadOptions::default()).unwrap();
let technique = effect.technique_by_name("draw").unwrap();
let pass = effect.technique_passes(technique).unwrap().get(0).unwrap();
let state = effect.apply_pass(pass, &mut NopBackend::new()).unwrap();
assert!(state.valid);
```

# Backends

The core never touches a device. [`NopBackend`] records what it was asked to create, and with
the `backend_wgpu` feature `WgpuBackend` translates records into [wgpu](https://wgpu.rs)
state. Backend failures only invalidate the block that failed.
*/

logwise::declare_logging_domain!(cfg!(feature = "logwise_internal"));

mod arena;
mod bittricks;
mod block;
pub mod container;
mod effect;
mod error;
mod evaluate;
mod graph;
mod imp;
mod pool;
mod reflection;
pub mod state;
pub mod types;
mod value;

pub use arena::{Ref, Span};
pub use block::PassState;
pub use container::builder::ContainerBuilder;
pub use container::{FormatVersion, HeaderCounts};
pub use effect::{Effect, LoadOptions, MemoryReport};
pub use error::{Error, Result};
pub use evaluate::{Assignment, Clock, Destination, Source};
pub use graph::{Block, ConstantBuffer, Group, Pass, Technique, Variable};
pub use imp::{Backend, BackendError, ConstantBufferUpload, NopBackend, NopObject, ObjectHandle};
#[cfg(feature = "backend_wgpu")]
pub use imp::{WgpuBackend, WgpuObject};
pub use pool::{StrRef, TypeRef};
pub use reflection::{AnnotationOwner, AnnotationView, Reflection};
pub use types::{Layout, LayoutClass};
pub use value::ScalarValue;
