//! Known collections and their merge keys.

/// Merge key used for collections that are not one of the known kinds.
pub const DEFAULT_MERGE_KEY: &str = "id";

/// The business collections both sides agree on.
///
/// Adding a kind requires updating the client schema and the server's
/// default dataset together, since both are derived from [`CollectionKind::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionKind {
    /// Quotations, keyed by document number.
    Quotations,
    /// Providers and clients, keyed by tax identifier.
    Providers,
    /// Purchase orders, keyed by document number.
    PurchaseOrders,
    /// Work orders, keyed by document number.
    WorkOrders,
}

impl CollectionKind {
    /// Every known collection, in wire order.
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::Providers,
        CollectionKind::Quotations,
        CollectionKind::PurchaseOrders,
        CollectionKind::WorkOrders,
    ];

    /// Returns the JSON key of this collection.
    pub fn wire_name(&self) -> &'static str {
        match self {
            CollectionKind::Quotations => "cotizaciones",
            CollectionKind::Providers => "clientes",
            CollectionKind::PurchaseOrders => "ordenesCompra",
            CollectionKind::WorkOrders => "ordenesTrabajo",
        }
    }

    /// Returns the record field used as identity within this collection.
    pub fn merge_key(&self) -> &'static str {
        match self {
            CollectionKind::Quotations
            | CollectionKind::PurchaseOrders
            | CollectionKind::WorkOrders => "numero",
            CollectionKind::Providers => "rut",
        }
    }

    /// Looks up a kind by its JSON key.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Returns the merge key for a collection name, known or not.
pub fn merge_key_for(collection: &str) -> &'static str {
    CollectionKind::from_wire_name(collection)
        .map(|kind| kind.merge_key())
        .unwrap_or(DEFAULT_MERGE_KEY)
}
