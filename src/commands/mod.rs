// Stack lifecycle commands: up, read, destroy
pub mod stack;
