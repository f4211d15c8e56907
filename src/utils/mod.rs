pub mod imaging;
pub mod pagination;
pub mod print_layout;
