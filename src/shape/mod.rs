//! Shape reflection
//!
//! Values describe themselves to the freezer through [`Reflect`], which yields
//! a [`Node`]: a closed tagged union with one variant per shape kind. Each
//! variant borrows the value through a small trait exposing exactly what the
//! walker needs for that kind.
//!
//! User records opt in with [`reflect_record!`](crate::reflect_record):
//!
//! ```
//! use pagefreeze::{reflect_record, Ptr};
//!
//! struct Account {
//!     balance: Ptr<i64>,
//!     audit: Ptr<i64>,
//! }
//!
//! reflect_record!(Account {
//!     exported balance,
//!     private audit,
//! });
//! ```

use crate::engine::FreezeEngine;
use crate::walker::GraphWalker;
use serde::Serialize;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Shape kind of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Plain data with no reachable mutable memory
    Scalar,
    /// Exclusively owned reference to one value
    Pointer,
    /// Inline array of a fixed length
    FixedArray,
    /// Growable sequence with a separate backing buffer
    Sequence,
    /// Hash map
    Map,
    /// Product type with named members
    Record,
    /// Shared or type-erased reference; never descended
    PolymorphicRef,
}

impl Kind {
    /// Kinds whose values may reach memory the walker would need to freeze.
    pub fn can_hold_pointers(self) -> bool {
        matches!(
            self,
            Kind::Pointer | Kind::FixedArray | Kind::Sequence | Kind::Map | Kind::Record
        )
    }

    /// Kinds accepted as the root of a deep freeze.
    pub fn is_freeze_root(self) -> bool {
        matches!(self, Kind::Pointer | Kind::Sequence | Kind::Map)
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Scalar => "scalar",
            Kind::Pointer => "pointer",
            Kind::FixedArray => "fixed array",
            Kind::Sequence => "sequence",
            Kind::Map => "map",
            Kind::Record => "record",
            Kind::PolymorphicRef => "polymorphic reference",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Member visibility. Private members are never descended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Exported,
    Private,
}

/// A value viewed through its shape
pub enum Node<'a> {
    Scalar,
    Pointer(&'a mut dyn PointerNode),
    FixedArray(&'a mut dyn ElementsNode),
    Sequence(&'a mut dyn SequenceNode),
    Map(&'a mut dyn MapNode),
    Record(&'a mut dyn RecordNode),
    PolymorphicRef,
}

impl Node<'_> {
    pub fn kind(&self) -> Kind {
        match self {
            Node::Scalar => Kind::Scalar,
            Node::Pointer(_) => Kind::Pointer,
            Node::FixedArray(_) => Kind::FixedArray,
            Node::Sequence(_) => Kind::Sequence,
            Node::Map(_) => Kind::Map,
            Node::Record(_) => Kind::Record,
            Node::PolymorphicRef => Kind::PolymorphicRef,
        }
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.kind())
    }
}

/// Types the freezer can classify and traverse
pub trait Reflect {
    const KIND: Kind;

    fn node(&mut self) -> Node<'_>;
}

/// Pointer-shaped values
pub trait PointerNode {
    fn is_null(&self) -> bool;

    fn pointee_kind(&self) -> Kind;

    /// The pointee, or `None` when null.
    fn pointee(&mut self) -> Option<Node<'_>>;

    /// Write the pointee bytes back onto themselves. Faults when the pointee
    /// is already frozen.
    fn store_in_place(&mut self);

    /// Copy the pointee into frozen pages and repoint at the copy. Returns
    /// whether a region was produced.
    fn freeze_pointee(&mut self, engine: &FreezeEngine) -> bool;
}

/// Indexable element storage (fixed arrays and sequences)
pub trait ElementsNode {
    fn element_kind(&self) -> Kind;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn element(&mut self, index: usize) -> Node<'_>;
}

/// Growable sequences whose backing buffer is frozen separately from the header
pub trait SequenceNode: ElementsNode {
    fn is_nil(&self) -> bool;

    /// Write the backing buffer back onto itself. Faults when it is already
    /// frozen.
    fn store_in_place(&mut self);

    /// Copy the backing buffer into frozen pages and repoint at the copy.
    /// Returns whether a region was produced.
    fn freeze_backing(&mut self, engine: &FreezeEngine) -> bool;
}

/// Hash maps
pub trait MapNode {
    fn key_kind(&self) -> Kind;

    fn value_kind(&self) -> Kind;

    fn is_nil(&self) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the protected part of the control record back onto itself.
    /// Faults when the map is already frozen.
    fn store_in_place(&mut self);

    /// Rebuild the map with every key and value walked by `walker`.
    fn rebuild_frozen(&mut self, walker: &mut GraphWalker<'_>);

    /// Freeze the bucket storage and split-freeze the control record.
    /// Returns whether the map ended up frozen.
    fn freeze_control(&mut self, engine: &FreezeEngine) -> bool;
}

/// One member of a record
pub struct Member<'a> {
    pub name: &'static str,
    pub visibility: Visibility,
    pub kind: Kind,
    pub node: Node<'a>,
}

impl<'a> Member<'a> {
    pub fn new<T: Reflect>(name: &'static str, visibility: Visibility, value: &'a mut T) -> Self {
        Self {
            name,
            visibility,
            kind: T::KIND,
            node: value.node(),
        }
    }

    pub fn is_exported(&self) -> bool {
        self.visibility == Visibility::Exported
    }
}

/// Product types with named members
pub trait RecordNode {
    fn type_name(&self) -> &'static str;

    fn members(&mut self) -> Vec<Member<'_>>;
}

macro_rules! reflect_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Reflect for $ty {
                const KIND: Kind = Kind::Scalar;

                fn node(&mut self) -> Node<'_> {
                    Node::Scalar
                }
            }
        )*
    };
}

reflect_scalar!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, (),
    &'static str,
);

// Opaque leaf: the heap buffer is not frozen.
reflect_scalar!(String);

impl<T: Reflect, const N: usize> Reflect for [T; N] {
    const KIND: Kind = Kind::FixedArray;

    fn node(&mut self) -> Node<'_> {
        Node::FixedArray(self)
    }
}

impl<T: Reflect, const N: usize> ElementsNode for [T; N] {
    fn element_kind(&self) -> Kind {
        T::KIND
    }

    fn len(&self) -> usize {
        N
    }

    fn element(&mut self, index: usize) -> Node<'_> {
        self[index].node()
    }
}

impl<T: ?Sized> Reflect for Box<T> {
    const KIND: Kind = Kind::PolymorphicRef;

    fn node(&mut self) -> Node<'_> {
        Node::PolymorphicRef
    }
}

impl<T: ?Sized> Reflect for Rc<T> {
    const KIND: Kind = Kind::PolymorphicRef;

    fn node(&mut self) -> Node<'_> {
        Node::PolymorphicRef
    }
}

impl<T: ?Sized> Reflect for Arc<T> {
    const KIND: Kind = Kind::PolymorphicRef;

    fn node(&mut self) -> Node<'_> {
        Node::PolymorphicRef
    }
}

/// Implement [`Reflect`] for a record, listing each member as `exported` or
/// `private`. Members must themselves implement [`Reflect`].
#[macro_export]
macro_rules! reflect_record {
    (@vis exported) => {
        $crate::shape::Visibility::Exported
    };
    (@vis private) => {
        $crate::shape::Visibility::Private
    };
    ($ty:ident { $($vis:ident $field:ident),* $(,)? }) => {
        impl $crate::shape::Reflect for $ty {
            const KIND: $crate::shape::Kind = $crate::shape::Kind::Record;

            fn node(&mut self) -> $crate::shape::Node<'_> {
                $crate::shape::Node::Record(self)
            }
        }

        impl $crate::shape::RecordNode for $ty {
            fn type_name(&self) -> &'static str {
                stringify!($ty)
            }

            fn members(&mut self) -> Vec<$crate::shape::Member<'_>> {
                vec![$(
                    $crate::shape::Member::new(
                        stringify!($field),
                        $crate::reflect_record!(@vis $vis),
                        &mut self.$field,
                    )
                ),*]
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pair {
        left: u32,
        right: [u8; 2],
    }

    reflect_record!(Pair {
        exported left,
        private right,
    });

    #[test]
    fn kinds_that_can_hold_pointers() {
        assert!(Kind::Pointer.can_hold_pointers());
        assert!(Kind::FixedArray.can_hold_pointers());
        assert!(Kind::Sequence.can_hold_pointers());
        assert!(Kind::Map.can_hold_pointers());
        assert!(Kind::Record.can_hold_pointers());
        assert!(!Kind::Scalar.can_hold_pointers());
        assert!(!Kind::PolymorphicRef.can_hold_pointers());
    }

    #[test]
    fn only_pointers_sequences_and_maps_are_roots() {
        assert!(Kind::Pointer.is_freeze_root());
        assert!(Kind::Sequence.is_freeze_root());
        assert!(Kind::Map.is_freeze_root());
        assert!(!Kind::Record.is_freeze_root());
        assert!(!Kind::FixedArray.is_freeze_root());
        assert!(!Kind::Scalar.is_freeze_root());
    }

    #[test]
    fn kind_display_is_lowercase() {
        assert_eq!(Kind::FixedArray.to_string(), "fixed array");
        assert_eq!(Kind::Scalar.to_string(), "scalar");
    }

    #[test]
    fn scalars_and_shared_refs_classify() {
        assert_eq!(7u64.node().kind(), Kind::Scalar);
        assert_eq!(String::from("x").node().kind(), Kind::Scalar);
        assert_eq!(Box::new(1).node().kind(), Kind::PolymorphicRef);
        assert_eq!(Rc::new(1).node().kind(), Kind::PolymorphicRef);
        assert_eq!(<Arc<str> as Reflect>::KIND, Kind::PolymorphicRef);
    }

    #[test]
    fn fixed_arrays_expose_elements() {
        let mut values = [1u8, 2, 3];
        match values.node() {
            Node::FixedArray(elements) => {
                assert_eq!(elements.len(), 3);
                assert_eq!(elements.element_kind(), Kind::Scalar);
                assert_eq!(elements.element(2).kind(), Kind::Scalar);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn record_members_keep_declaration_order_and_visibility() {
        let mut pair = Pair {
            left: 1,
            right: [0, 0],
        };
        match pair.node() {
            Node::Record(record) => {
                assert_eq!(record.type_name(), "Pair");
                let members = record.members();
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].name, "left");
                assert!(members[0].is_exported());
                assert_eq!(members[0].kind, Kind::Scalar);
                assert_eq!(members[1].name, "right");
                assert_eq!(members[1].visibility, Visibility::Private);
                assert_eq!(members[1].kind, Kind::FixedArray);
            }
            other => panic!("unexpected node {:?}", other),
        }
        assert_eq!(pair.left, 1);
    }
}
