pub mod checkout_reader;
pub mod subscription_writer;
