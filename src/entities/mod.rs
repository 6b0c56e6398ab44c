pub mod delivery_slot;
pub mod order;
pub mod order_line;
pub mod order_sequence;
pub mod order_status_history;
pub mod payment;

pub use delivery_slot::Entity as DeliverySlot;
pub use order::Entity as Order;
pub use order_line::Entity as OrderLine;
pub use order_sequence::Entity as OrderSequence;
pub use order_status_history::Entity as OrderStatusHistory;
pub use payment::Entity as Payment;
