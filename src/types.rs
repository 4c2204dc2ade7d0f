//! OpenCL vector element types
//!
//! Host-side layouts of `float2`, `float4`, `int2`, `int4`, `uint2` and
//! `uint4` for use with typed readback. Decoding never assumes alignment,
//! so the types are plain `repr(C)` structs.

use bytemuck::{Pod, Zeroable};

macro_rules! vector_type {
    ($name:ident, $elem:ty, $cl:literal, $($field:ident),+) => {
        #[doc = concat!("Host layout of OpenCL `", $cl, "`")]
        #[repr(C)]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
        pub struct $name {
            $(pub $field: $elem,)+
        }

        impl $name {
            pub const fn new($($field: $elem),+) -> Self {
                Self { $($field),+ }
            }

            /// Every component set to `value`
            pub const fn splat(value: $elem) -> Self {
                Self { $($field: value),+ }
            }
        }
    };
}

vector_type!(Float2, f32, "float2", x, y);
vector_type!(Float4, f32, "float4", x, y, z, w);
vector_type!(Int2, i32, "int2", x, y);
vector_type!(Int4, i32, "int4", x, y, z, w);
vector_type!(UInt2, u32, "uint2", x, y);
vector_type!(UInt4, u32, "uint4", x, y, z, w);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes_match_opencl() {
        assert_eq!(std::mem::size_of::<Float2>(), 8);
        assert_eq!(std::mem::size_of::<Float4>(), 16);
        assert_eq!(std::mem::size_of::<Int2>(), 8);
        assert_eq!(std::mem::size_of::<Int4>(), 16);
        assert_eq!(std::mem::size_of::<UInt2>(), 8);
        assert_eq!(std::mem::size_of::<UInt4>(), 16);
    }

    #[test]
    fn test_component_order() {
        let v = Float4::new(1.0, 2.0, 3.0, 4.0);
        let floats: &[f32] = bytemuck::cast_slice(std::slice::from_ref(&v));
        assert_eq!(floats, &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(Int2::splat(-3), Int2::new(-3, -3));
    }
}
