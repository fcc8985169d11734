//! Property-based test generators using proptest.

use entimap_codec::Value;
use proptest::prelude::*;

/// Strategy for scalar values of every kind.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        "[a-zA-Z ]{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Value::Bytes),
    ]
}

/// Strategy for user names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{0,9}( [A-Z][a-z]{0,9})?"
}

/// An operation applied to a loaded user/blog pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOp {
    /// Set the user's name.
    SetName(String),
    /// Set the user's balance.
    SetBalance(i64),
    /// Set the blog's title (`None` clears it).
    SetTitle(Option<String>),
    /// Resolve `blog.author`.
    ResolveAuthor,
    /// Resolve `user.blog`.
    ResolveBlog,
    /// Look the user up again by key.
    FindUser,
}

impl UserOp {
    /// Returns true if the operation cannot change any column.
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self, Self::ResolveAuthor | Self::ResolveBlog | Self::FindUser)
    }
}

/// Strategy for a single operation.
pub fn user_op_strategy() -> impl Strategy<Value = UserOp> {
    prop_oneof![
        name_strategy().prop_map(UserOp::SetName),
        (-10_000i64..10_000).prop_map(UserOp::SetBalance),
        proptest::option::of("[a-z ]{0,10}").prop_map(UserOp::SetTitle),
        Just(UserOp::ResolveAuthor),
        Just(UserOp::ResolveBlog),
        Just(UserOp::FindUser),
    ]
}

/// Strategy for read-only operations.
pub fn read_op_strategy() -> impl Strategy<Value = UserOp> {
    prop_oneof![
        Just(UserOp::ResolveAuthor),
        Just(UserOp::ResolveBlog),
        Just(UserOp::FindUser),
    ]
}

/// Strategy for a sequence of operations.
pub fn user_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<UserOp>> {
    prop::collection::vec(user_op_strategy(), 0..max_len)
}
