//! Reading and writing variable values.

use super::Effect;
use crate::arena::Ref;
use crate::error::{Error, Result};
use crate::graph::{Variable, VariableData};
use crate::types::{LayoutClass, NumericType};
use crate::value::ScalarValue;

fn size_mismatch(expected: u32, actual: usize) -> Error {
    Error::argument(format!("expected {expected} bytes, got {actual}"))
}

impl Effect {
    /// A variable that lives in a constant buffer.
    fn buffered(&self, variable: Ref<Variable>) -> Result<&Variable> {
        let entry = self.variable(variable)?;
        match entry.data {
            VariableData::Numeric { .. } => Ok(entry),
            _ => Err(Error::argument("variable does not live in a constant buffer")),
        }
    }

    fn numeric(&self, variable: Ref<Variable>) -> Result<NumericType> {
        self.buffered(variable)?
            .layout
            .numeric()
            .copied()
            .ok_or_else(|| Error::argument("variable is not numeric"))
    }

    /// A numeric variable holding exactly one component.
    fn scalar(&self, variable: Ref<Variable>) -> Result<NumericType> {
        let numeric = self.numeric(variable)?;
        let layout = self.buffered(variable)?.layout;
        if numeric.components() != 1 || layout.elements != 0 {
            return Err(Error::argument("variable is not a single scalar"));
        }
        Ok(numeric)
    }

    fn footprint_mut(&mut self, variable: Ref<Variable>) -> Result<&mut [u8]> {
        self.runtime
            .footprint_bytes_mut(variable)
            .ok_or_else(|| Error::inconsistency("variable outside its buffer bytes"))
    }

    /// Every byte of a buffered variable, elements at their stride.
    pub fn get_raw(&self, variable: Ref<Variable>) -> Result<&[u8]> {
        let entry = self.buffered(variable)?;
        self.runtime
            .footprint_bytes(entry)
            .ok_or_else(|| Error::inconsistency("variable outside its buffer bytes"))
    }

    pub fn get_element_raw(&self, variable: Ref<Variable>, element: u32) -> Result<&[u8]> {
        let entry = self.buffered(variable)?;
        self.runtime
            .element_bytes(entry, element)
            .ok_or_else(|| Error::argument(format!("variable has no element {element}")))
    }

    /// Replaces every byte of a buffered variable. `bytes` must match its footprint.
    pub fn set_raw(&mut self, variable: Ref<Variable>, bytes: &[u8]) -> Result<()> {
        let footprint = self.buffered(variable)?.layout.footprint();
        if bytes.len() != footprint as usize {
            return Err(size_mismatch(footprint, bytes.len()));
        }
        self.footprint_mut(variable)?.copy_from_slice(bytes);
        self.touch(variable);
        Ok(())
    }

    pub fn set_element_raw(&mut self, variable: Ref<Variable>, element: u32, bytes: &[u8]) -> Result<()> {
        let layout = self.buffered(variable)?.layout;
        if element >= layout.count() {
            return Err(Error::argument(format!("variable has no element {element}")));
        }
        if bytes.len() != layout.element_size as usize {
            return Err(size_mismatch(layout.element_size, bytes.len()));
        }
        let start = element as usize * layout.stride as usize;
        self.footprint_mut(variable)?
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| Error::inconsistency("element outside its variable"))?
            .copy_from_slice(bytes);
        self.touch(variable);
        Ok(())
    }

    fn set_scalar(&mut self, variable: Ref<Variable>, value: ScalarValue) -> Result<()> {
        let scalar = self.scalar(variable)?.scalar;
        value
            .write(scalar, self.footprint_mut(variable)?)
            .ok_or_else(|| Error::inconsistency("scalar does not fit its variable"))?;
        self.touch(variable);
        Ok(())
    }

    /// Sets a scalar variable, converting to its declared kind.
    pub fn set_int(&mut self, variable: Ref<Variable>, value: i32) -> Result<()> {
        self.set_scalar(variable, ScalarValue::Int(value))
    }

    pub fn set_uint(&mut self, variable: Ref<Variable>, value: u32) -> Result<()> {
        self.set_scalar(variable, ScalarValue::UInt(value))
    }

    pub fn set_float(&mut self, variable: Ref<Variable>, value: f32) -> Result<()> {
        self.set_scalar(variable, ScalarValue::Float(value))
    }

    pub fn set_bool(&mut self, variable: Ref<Variable>, value: bool) -> Result<()> {
        self.set_scalar(variable, ScalarValue::Bool(value))
    }

    /// Sets every component of every element, in element then row-major component order.
    pub fn set_floats(&mut self, variable: Ref<Variable>, values: &[f32]) -> Result<()> {
        let numeric = self.numeric(variable)?;
        let layout = self.buffered(variable)?.layout;
        let components = numeric.components();
        let expected = layout.count() as usize * components as usize;
        if values.len() != expected {
            return Err(Error::argument(format!("expected {expected} values, got {}", values.len())));
        }
        let bytes = self.footprint_mut(variable)?;
        for (index, value) in values.iter().enumerate() {
            let (element, component) = (index as u32 / components, index as u32 % components);
            let at = (element * layout.stride + numeric.component_offset(component)) as usize;
            bytes
                .get_mut(at..)
                .and_then(|out| ScalarValue::Float(*value).write(numeric.scalar, out))
                .ok_or_else(|| Error::inconsistency("component outside its variable"))?;
        }
        self.touch(variable);
        Ok(())
    }

    fn first_component(&self, variable: Ref<Variable>) -> Result<ScalarValue> {
        let numeric = self.numeric(variable)?;
        ScalarValue::read(numeric.scalar, self.get_element_raw(variable, 0)?)
            .ok_or_else(|| Error::inconsistency("variable shorter than its first component"))
    }

    /// The first component of a numeric variable, converted.
    pub fn get_int(&self, variable: Ref<Variable>) -> Result<i32> {
        self.first_component(variable).map(ScalarValue::as_i32)
    }

    pub fn get_uint(&self, variable: Ref<Variable>) -> Result<u32> {
        self.first_component(variable).map(ScalarValue::as_u32)
    }

    pub fn get_float(&self, variable: Ref<Variable>) -> Result<f32> {
        self.first_component(variable).map(ScalarValue::as_f32)
    }

    pub fn get_bool(&self, variable: Ref<Variable>) -> Result<bool> {
        self.first_component(variable).map(ScalarValue::as_bool)
    }

    /// Element `element` of a string variable. Strings live in the reflection data.
    pub fn string_value(&self, variable: Ref<Variable>, element: u32) -> Result<&str> {
        self.reflection()?.string_value(variable, element)
    }

    /// Points an interface variable at a struct variable that implements an interface, or at
    /// nothing.
    pub fn set_interface_binding(&mut self, variable: Ref<Variable>, target: Option<Ref<Variable>>) -> Result<()> {
        if let Some(target) = target {
            let class = self.variable(target)?.layout.class;
            if class != (LayoutClass::Struct { implements_interface: true }) {
                return Err(Error::argument("binding target does not implement an interface"));
            }
        }
        let entry = self
            .runtime
            .variables
            .get_mut(variable.index())
            .ok_or_else(|| Error::argument(format!("no variable at index {}", variable.index())))?;
        let VariableData::Interface { binding } = &mut entry.data else {
            return Err(Error::argument("variable is not an interface"));
        };
        *binding = target;
        self.touch(variable);
        Ok(())
    }

    pub fn interface_binding(&self, variable: Ref<Variable>) -> Result<Option<Ref<Variable>>> {
        match self.variable(variable)?.data {
            VariableData::Interface { binding } => Ok(binding),
            _ => Err(Error::argument("variable is not an interface")),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::container::FormatVersion;
    use crate::container::builder::{BufferSpec, ContainerBuilder, InterfaceSpec, VariableSpec};
    use crate::effect::{Effect, LoadOptions};
    use crate::error::Error;
    use crate::types::{NumericType, ScalarKind};

    fn effect() -> Effect {
        let mut builder = ContainerBuilder::new(FormatVersion::Fx5_0);
        let int = builder.numeric_type("int", NumericType::scalar(ScalarKind::Int), 0).unwrap();
        let float2 = builder.numeric_type("float2", NumericType::vector(ScalarKind::Float, 2), 3).unwrap();
        let matrix = builder
            .numeric_type("float2x2", NumericType::matrix(ScalarKind::Float, 2, 2, false), 0)
            .unwrap();
        let float = builder.numeric_type("float", NumericType::scalar(ScalarKind::Float), 0).unwrap();
        let light = builder.struct_type("Light", &[("power", None, 0, &float)], 0, None, true).unwrap();
        let plain = builder.struct_type("Plain", &[("power", None, 0, &float)], 0, None, false).unwrap();
        let iface = builder.interface_type("ILight", 0).unwrap();
        builder.constant_buffer(
            BufferSpec::new("cb", 128)
                .variable(VariableSpec::new("n", int, 0))
                .variable(VariableSpec::new("uvs", float2, 16))
                .variable(VariableSpec::new("m", matrix, 64))
                .variable(VariableSpec::new("sun", light, 96))
                .variable(VariableSpec::new("plain", plain, 112)),
        );
        builder.interface_variable(InterfaceSpec::new("light", iface));
        Effect::load(&builder.finish().unwrap(), &LoadOptions::default()).unwrap()
    }

    #[test]
    fn scalars_convert_to_the_declared_kind() {
        let mut effect = effect();
        let n = effect.variable_by_name("n").unwrap();
        effect.set_float(n, 3.9).unwrap();
        assert_eq!(effect.get_int(n).unwrap(), 3);
        effect.set_bool(n, true).unwrap();
        assert_eq!(effect.get_uint(n).unwrap(), 1);
        let uvs = effect.variable_by_name("uvs").unwrap();
        assert!(matches!(effect.set_int(uvs, 1), Err(Error::InvalidArgument { .. })));
    }

    #[test]
    fn arrays_and_matrices_follow_their_layout() {
        let mut effect = effect();
        let uvs = effect.variable_by_name("uvs").unwrap();
        effect.set_floats(uvs, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let element = effect.get_element_raw(uvs, 2).unwrap();
        assert_eq!(&element[..4], &5.0f32.to_le_bytes());
        assert_eq!(effect.get_raw(uvs).unwrap().len(), 2 * 16 + 8);
        assert!(effect.set_floats(uvs, &[1.0]).is_err());

        let m = effect.variable_by_name("m").unwrap();
        effect.set_floats(m, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let raw = effect.get_raw(m).unwrap();
        // row-major rows occupy one register each
        assert_eq!(&raw[16..20], &3.0f32.to_le_bytes());
    }

    #[test]
    fn raw_writes_check_their_size_and_bump_the_timestamp() {
        let mut effect = effect();
        let n = effect.variable_by_name("n").unwrap();
        assert!(effect.set_raw(n, &[0; 3]).is_err());
        effect.set_raw(n, &7i32.to_le_bytes()).unwrap();
        assert_eq!(effect.get_int(n).unwrap(), 7);
        let uvs = effect.variable_by_name("uvs").unwrap();
        effect.set_element_raw(uvs, 1, &[0; 8]).unwrap();
        assert!(effect.set_element_raw(uvs, 3, &[0; 8]).is_err());
        let buffer = effect.buffers().get(0).unwrap();
        assert!(effect.is_buffer_dirty(buffer).unwrap());
    }

    #[test]
    fn interface_bindings_require_an_implementation() {
        let mut effect = effect();
        let light = effect.variable_by_name("light").unwrap();
        let sun = effect.variable_by_name("sun").unwrap();
        let plain = effect.variable_by_name("plain").unwrap();
        assert_eq!(effect.interface_binding(light).unwrap(), None);
        effect.set_interface_binding(light, Some(sun)).unwrap();
        assert_eq!(effect.interface_binding(light).unwrap(), Some(sun));
        assert!(effect.set_interface_binding(light, Some(plain)).is_err());
        assert!(effect.set_interface_binding(sun, None).is_err());
    }
}
