//! Interfaces to the collaborators this core consumes but does not own:
//! the cart/pricing service and the saved-address store. Both are external
//! systems; the traits here are the seam, and the in-memory implementations
//! back local wiring and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;

/// One priced line as computed upstream (catalog + discount + tax).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
}

/// A fully priced cart. Opaque to this core: totals are computed upstream
/// and only checked for internal consistency here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total: Decimal,
}

/// Contact details for a guest (unauthenticated) buyer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct GuestContact {
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
}

/// Who is buying: an authenticated user or a guest, never both.
#[derive(Debug, Clone)]
pub enum BuyerContext {
    User(Uuid),
    Guest(GuestContact),
}

impl BuyerContext {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            BuyerContext::User(id) => Some(*id),
            BuyerContext::Guest(_) => None,
        }
    }

    /// Stable cart-storage key.
    pub fn key(&self) -> String {
        match self {
            BuyerContext::User(id) => format!("user:{id}"),
            BuyerContext::Guest(contact) => format!("guest:{}", contact.email),
        }
    }
}

/// Delivery address captured at order time. Persisted verbatim onto the
/// order; the live address record is never re-read.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddressSnapshot {
    #[validate(length(min = 1))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1))]
    pub district: String,
    #[validate(length(min = 1))]
    pub city: String,
    pub reference: Option<String>,
    #[validate(length(min = 1))]
    pub contact_name: String,
    pub contact_phone: Option<String>,
}

/// Cart/pricing collaborator.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// The buyer's current priced cart, if any.
    async fn priced_cart(&self, buyer: &BuyerContext) -> Result<Option<PricedCart>, ServiceError>;

    /// Empties the buyer's cart. Called after a successful capture.
    async fn clear_cart(&self, buyer: &BuyerContext) -> Result<(), ServiceError>;
}

/// Saved-address collaborator.
#[async_trait]
pub trait AddressBook: Send + Sync {
    /// Resolves one of the user's saved addresses to a snapshot.
    async fn resolve(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<AddressSnapshot>, ServiceError>;
}

/// In-memory cart store.
#[derive(Debug, Default)]
pub struct InMemoryCartStore {
    carts: DashMap<String, PricedCart>,
}

impl InMemoryCartStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_cart(&self, buyer: &BuyerContext, cart: PricedCart) {
        self.carts.insert(buyer.key(), cart);
    }

    pub fn has_cart(&self, buyer: &BuyerContext) -> bool {
        self.carts.contains_key(&buyer.key())
    }
}

#[async_trait]
impl CartStore for InMemoryCartStore {
    async fn priced_cart(&self, buyer: &BuyerContext) -> Result<Option<PricedCart>, ServiceError> {
        Ok(self.carts.get(&buyer.key()).map(|c| c.clone()))
    }

    async fn clear_cart(&self, buyer: &BuyerContext) -> Result<(), ServiceError> {
        self.carts.remove(&buyer.key());
        Ok(())
    }
}

/// In-memory address book.
#[derive(Debug, Default)]
pub struct InMemoryAddressBook {
    addresses: DashMap<(Uuid, Uuid), AddressSnapshot>,
}

impl InMemoryAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, user_id: Uuid, address_id: Uuid, snapshot: AddressSnapshot) {
        self.addresses.insert((user_id, address_id), snapshot);
    }
}

#[async_trait]
impl AddressBook for InMemoryAddressBook {
    async fn resolve(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<AddressSnapshot>, ServiceError> {
        Ok(self
            .addresses
            .get(&(user_id, address_id))
            .map(|a| a.clone()))
    }
}
