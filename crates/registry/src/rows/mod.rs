mod book;
mod virtual_book;

pub(crate) use self::book::{BookRow, state_columns};
pub(crate) use self::virtual_book::VirtualBookRow;
