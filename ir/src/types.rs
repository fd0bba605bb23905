//! Type definitions for graph values and operation payloads.
//!
//! Values are typed with [`Type`]: scalars, ranked tensors living in registers,
//! or memory descriptors pointing into on-chip storage (shared memory or
//! tensor memory).

use std::fmt;

use smallvec::SmallVec;

/// Element type of scalars, tensors and memory descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ScalarType {
    I1,
    I32,
    I64,
    F16,
    BF16,
    F32,
}

impl ScalarType {
    pub fn is_int(self) -> bool {
        matches!(self, Self::I1 | Self::I32 | Self::I64)
    }

    pub fn is_float(self) -> bool {
        !self.is_int()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// On-chip memory a descriptor points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemorySpace {
    /// Shared memory: operand tiles and hardware barriers.
    Shared,
    /// Tensor memory: MMA accumulators.
    Tensor,
}

/// Shape of a tensor or memory descriptor.
pub type Shape = SmallVec<[i64; 4]>;

/// Memory descriptor type: a typed view of an on-chip allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemDescType {
    pub shape: Shape,
    pub elem: ScalarType,
    pub space: MemorySpace,
    pub mutable: bool,
}

impl MemDescType {
    pub fn new(shape: impl Into<Shape>, elem: ScalarType, space: MemorySpace) -> Self {
        Self { shape: shape.into(), elem, space, mutable: true }
    }

    /// Type of the same allocation with `depth` slots stacked on a new leading dimension.
    pub fn multi_buffered(&self, depth: i64) -> Self {
        let mut shape = Shape::with_capacity(self.shape.len() + 1);
        shape.push(depth);
        shape.extend_from_slice(&self.shape);
        Self { shape, elem: self.elem, space: self.space, mutable: true }
    }

    /// Type of a single slot taken along the leading dimension.
    ///
    /// A rank-1 descriptor yields a `[1]` view.
    pub fn single_slot(&self) -> Self {
        let shape: Shape = if self.shape.len() > 1 { self.shape[1..].into() } else { Shape::from_slice(&[1]) };
        Self { shape, elem: self.elem, space: self.space, mutable: self.mutable }
    }
}

/// Type of a value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(ScalarType),
    Tensor { shape: Shape, elem: ScalarType },
    MemDesc(MemDescType),
    /// Ordering token produced by asynchronous operations.
    Token,
}

impl Type {
    pub const I1: Type = Type::Scalar(ScalarType::I1);
    pub const I32: Type = Type::Scalar(ScalarType::I32);
    pub const I64: Type = Type::Scalar(ScalarType::I64);

    pub fn tensor(shape: impl Into<Shape>, elem: ScalarType) -> Self {
        Type::Tensor { shape: shape.into(), elem }
    }

    pub fn is_memdesc(&self) -> bool {
        matches!(self, Type::MemDesc(_))
    }

    pub fn as_memdesc(&self) -> Option<&MemDescType> {
        match self {
            Type::MemDesc(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn is_bool(&self) -> bool {
        *self == Type::I1
    }
}

fn write_shape(f: &mut fmt::Formatter<'_>, shape: &[i64]) -> fmt::Result {
    for dim in shape {
        write!(f, "{dim}x")?;
    }
    Ok(())
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(s) => write!(f, "{}", s.name()),
            Type::Tensor { shape, elem } => {
                write!(f, "tensor<")?;
                write_shape(f, shape)?;
                write!(f, "{}>", elem.name())
            }
            Type::MemDesc(desc) => {
                write!(f, "memdesc<")?;
                write_shape(f, &desc.shape)?;
                let space = match desc.space {
                    MemorySpace::Shared => "shared",
                    MemorySpace::Tensor => "tmem",
                };
                write!(f, "{}, {space}{}>", desc.elem.name(), if desc.mutable { ", mutable" } else { "" })
            }
            Type::Token => write!(f, "token"),
        }
    }
}

/// Payload of a `Constant` operation. Tensor constants are splats.
#[derive(Debug, Clone, Copy, PartialEq, derive_more::Display)]
pub enum ConstValue {
    #[display("{_0}")]
    Int(i64),
    #[display("{_0:?}")]
    Float(f64),
    #[display("{_0}")]
    Bool(bool),
}

impl ConstValue {
    pub fn as_int(self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(v),
            ConstValue::Bool(b) => Some(b as i64),
            ConstValue::Float(_) => None,
        }
    }
}

/// Integer comparison predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum CmpPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpPredicate {
    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Slt => lhs < rhs,
            Self::Sle => lhs <= rhs,
            Self::Sgt => lhs > rhs,
            Self::Sge => lhs >= rhs,
        }
    }
}

/// Discardable attribute attached to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Attribute {
    #[display("unit")]
    Unit,
    #[display("{_0}")]
    Int(i64),
    #[display("{_0}")]
    Bool(bool),
}

impl Attribute {
    pub fn as_int(self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(v),
            _ => None,
        }
    }
}
