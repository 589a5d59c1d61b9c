// Vertex input description
//
// Vertex and instance record types describe their own GPU layout.
// Vertex data is bound at slot 0, per-instance data at slot 1.

use ash::vk;
use bytemuck::Pod;

pub const VERTEX_BINDING: u32 = 0;
pub const INSTANCE_BINDING: u32 = 1;

/// GPU layout of a vertex or instance record
pub trait VertexLayout: Pod {
    /// Binding description (slot, stride, input rate)
    fn binding() -> vk::VertexInputBindingDescription;

    /// Attributes in location order
    fn attributes() -> Vec<vk::VertexInputAttributeDescription>;
}

/// Helper for the common case of one tightly packed record per binding
pub fn binding_for<T>(binding: u32, input_rate: vk::VertexInputRate) -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding,
        stride: std::mem::size_of::<T>() as u32,
        input_rate,
    }
}

pub fn attribute(
    binding: u32,
    location: u32,
    format: vk::Format,
    offset: usize,
) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        location,
        binding,
        format,
        offset: offset as u32,
    }
}

/// Index element types accepted by index buffers
pub trait IndexType: Pod {
    const VK_TYPE: vk::IndexType;
}

impl IndexType for u16 {
    const VK_TYPE: vk::IndexType = vk::IndexType::UINT16;
}

impl IndexType for u32 {
    const VK_TYPE: vk::IndexType = vk::IndexType::UINT32;
}

/// Combined vertex input state for a vertex/instance pair
#[derive(Debug, Clone, Default)]
pub struct VertexInput {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInput {
    pub fn of<V: VertexLayout, I: VertexLayout>() -> Self {
        let vertex = V::binding();
        let instance = I::binding();
        debug_assert_eq!(vertex.binding, VERTEX_BINDING);
        debug_assert_eq!(instance.binding, INSTANCE_BINDING);

        let mut attributes = V::attributes();
        attributes.extend(I::attributes());

        Self {
            bindings: vec![vertex, instance],
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use std::mem::offset_of;

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Vertex {
        pos: [f32; 2],
        uv: [f32; 2],
    }

    impl VertexLayout for Vertex {
        fn binding() -> vk::VertexInputBindingDescription {
            binding_for::<Self>(VERTEX_BINDING, vk::VertexInputRate::VERTEX)
        }

        fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
            vec![
                attribute(VERTEX_BINDING, 0, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, pos)),
                attribute(VERTEX_BINDING, 1, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
            ]
        }
    }

    #[repr(C)]
    #[derive(Clone, Copy, Pod, Zeroable)]
    struct Instance {
        offset: [f32; 2],
        color: [f32; 4],
    }

    impl VertexLayout for Instance {
        fn binding() -> vk::VertexInputBindingDescription {
            binding_for::<Self>(INSTANCE_BINDING, vk::VertexInputRate::INSTANCE)
        }

        fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
            vec![
                attribute(INSTANCE_BINDING, 2, vk::Format::R32G32_SFLOAT, offset_of!(Instance, offset)),
                attribute(
                    INSTANCE_BINDING,
                    3,
                    vk::Format::R32G32B32A32_SFLOAT,
                    offset_of!(Instance, color),
                ),
            ]
        }
    }

    #[test]
    fn vertex_input_concatenates_both_bindings() {
        let input = VertexInput::of::<Vertex, Instance>();

        assert_eq!(input.bindings.len(), 2);
        assert_eq!(input.bindings[0].stride, 16);
        assert_eq!(input.bindings[1].stride, 24);
        assert_eq!(input.bindings[1].input_rate, vk::VertexInputRate::INSTANCE);

        let locations: Vec<u32> = input.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);
        assert_eq!(input.attributes[1].offset, 8);
        assert_eq!(input.attributes[3].binding, INSTANCE_BINDING);
    }

    #[test]
    fn index_types_map_to_vulkan() {
        assert_eq!(<u16 as IndexType>::VK_TYPE, vk::IndexType::UINT16);
        assert_eq!(<u32 as IndexType>::VK_TYPE, vk::IndexType::UINT32);
    }
}
