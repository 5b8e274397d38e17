pub mod list;
pub mod pqueue;

pub use list::List;
pub use pqueue::PriorityQueue;
