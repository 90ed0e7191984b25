//! MongoDB-backed billing store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{self, doc, Bson, Document},
    options::{
        ClientOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions, IndexOptions,
        ReturnDocument,
    },
    Client as MongoClient, Collection, Database, IndexModel,
};
use rust_decimal::prelude::*;
use salon_core::error::AppError;
use tracing::instrument;

use crate::models::{
    Bill, BillFinalization, BillItem, BookingStatus, CatalogEntry, ItemType, ListBillsFilter,
    Membership, MembershipPlan, MembershipStatus, PrepaidPackage, PrepaidStatus, Product,
};
use crate::services::store::BillingStore;

/// Prepaid balances are rounded server-side to this many places after every
/// debit or credit, which covers every supported money precision.
const BALANCE_PRECISION: i32 = 6;

#[derive(Clone)]
pub struct MongoStore {
    client: MongoClient,
    db: Database,
}

fn db_error(context: &'static str) -> impl FnOnce(mongodb::error::Error) -> AppError {
    move |e| {
        tracing::error!("{}: {}", context, e);
        AppError::from(e)
    }
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(db_error("Failed to parse MongoDB URI"))?;
        options.app_name = Some("salon-billing-service".to_string());

        let client = MongoClient::with_options(options)
            .map_err(db_error("Failed to connect to MongoDB"))?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for salon-billing-service");

        let branch_index = IndexModel::builder()
            .keys(doc! { "branch_id": 1, "created_at": -1 })
            .options(IndexOptions::builder().name("branch_bills".to_string()).build())
            .build();
        let appointment_index = IndexModel::builder()
            .keys(doc! { "branch_id": 1, "appointment_id": 1, "booking_status": 1 })
            .options(
                IndexOptions::builder()
                    .name("appointment_open_bill".to_string())
                    .build(),
            )
            .build();
        let customer_index = IndexModel::builder()
            .keys(doc! { "customer_id": 1 })
            .options(IndexOptions::builder().name("customer_bills".to_string()).build())
            .build();

        self.bills()
            .create_indexes([branch_index, appointment_index, customer_index], None)
            .await
            .map_err(db_error("Failed to create indexes on bills collection"))?;
        tracing::info!("Created indexes on bills");

        let membership_index = IndexModel::builder()
            .keys(doc! { "customer_id": 1, "status": 1, "expiry_date": -1 })
            .options(
                IndexOptions::builder()
                    .name("customer_active_membership".to_string())
                    .build(),
            )
            .build();

        self.db
            .collection::<Membership>("memberships")
            .create_indexes([membership_index], None)
            .await
            .map_err(db_error("Failed to create indexes on memberships collection"))?;
        tracing::info!("Created indexes on memberships");

        Ok(())
    }

    fn bills(&self) -> Collection<Bill> {
        self.db.collection("bills")
    }

    fn products(&self) -> Collection<Product> {
        self.db.collection("products")
    }

    fn prepaid_packages(&self) -> Collection<PrepaidPackage> {
        self.db.collection("prepaid_packages")
    }

    fn counters(&self) -> Collection<Document> {
        self.db.collection("counters")
    }

    fn open_bill_filter(bill_id: &str, expected_version: i64) -> Document {
        doc! {
            "_id": bill_id,
            "version": expected_version,
            "booking_status": BookingStatus::Pending.as_str(),
            "is_deleted": { "$ne": true },
        }
    }

    /// Atomic `$inc` on a prepaid balance, rounded and with the status
    /// recomputed in the same pipeline update.
    async fn adjust_prepaid(
        &self,
        filter: Document,
        delta: f64,
    ) -> Result<Option<PrepaidPackage>, AppError> {
        let pipeline = vec![
            doc! {
                "$set": {
                    "remaining_balance": {
                        "$round": [{ "$add": ["$remaining_balance", delta] }, BALANCE_PRECISION]
                    }
                }
            },
            doc! {
                "$set": {
                    "status": {
                        "$cond": [
                            { "$lte": ["$remaining_balance", 0] },
                            PrepaidStatus::Used.as_str(),
                            PrepaidStatus::Active.as_str(),
                        ]
                    }
                }
            },
        ];
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.prepaid_packages()
            .find_one_and_update(filter, pipeline, options)
            .await
            .map_err(db_error("Failed to update prepaid balance"))
    }
}

#[async_trait]
impl BillingStore for MongoStore {
    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(db_error("MongoDB health check failed"))?;
        Ok(())
    }

    #[instrument(skip(self, bill), fields(bill_id = %bill.id, branch_id = %bill.branch_id))]
    async fn insert_bill(&self, bill: &Bill) -> Result<(), AppError> {
        self.bills()
            .insert_one(bill, None)
            .await
            .map_err(db_error("Failed to insert bill"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_bill(&self, bill_id: &str) -> Result<Option<Bill>, AppError> {
        self.bills()
            .find_one(doc! { "_id": bill_id }, None)
            .await
            .map_err(db_error("Failed to fetch bill"))
    }

    #[instrument(skip(self))]
    async fn find_open_bill_for_appointment(
        &self,
        branch_id: &str,
        appointment_id: &str,
    ) -> Result<Option<Bill>, AppError> {
        let filter = doc! {
            "branch_id": branch_id,
            "appointment_id": appointment_id,
            "booking_status": BookingStatus::Pending.as_str(),
            "is_deleted": { "$ne": true },
        };
        let options = FindOneOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();

        self.bills()
            .find_one(filter, options)
            .await
            .map_err(db_error("Failed to look up appointment bill"))
    }

    #[instrument(skip(self, filter), fields(branch_id = %filter.branch_id))]
    async fn list_bills(&self, filter: &ListBillsFilter) -> Result<(Vec<Bill>, u64), AppError> {
        let mut query = doc! {
            "branch_id": &filter.branch_id,
            "is_deleted": { "$ne": true },
        };
        if let Some(status) = filter.status {
            query.insert("booking_status", status.as_str());
        }
        if let Some(customer_id) = &filter.customer_id {
            query.insert("customer_id", customer_id);
        }

        let total = self
            .bills()
            .count_documents(query.clone(), None)
            .await
            .map_err(db_error("Failed to count bills"))?;

        let find_options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .skip(filter.page.saturating_sub(1) * filter.page_size)
            .limit(filter.page_size as i64)
            .build();

        let cursor = self
            .bills()
            .find(query, find_options)
            .await
            .map_err(db_error("Failed to list bills"))?;
        let bills: Vec<Bill> = cursor
            .try_collect()
            .await
            .map_err(db_error("Failed to collect bills"))?;

        Ok((bills, total))
    }

    #[instrument(skip(self, items))]
    async fn update_items(
        &self,
        bill_id: &str,
        expected_version: i64,
        items: &[BillItem],
        subtotal: f64,
    ) -> Result<bool, AppError> {
        let update = doc! {
            "$set": {
                "items": bson::to_bson(items)?,
                "subtotal": subtotal,
                "updated_at": bson::DateTime::from_chrono(Utc::now()),
            },
            "$inc": { "version": 1_i64 },
        };

        let result = self
            .bills()
            .update_one(Self::open_bill_filter(bill_id, expected_version), update, None)
            .await
            .map_err(db_error("Failed to update bill items"))?;
        Ok(result.modified_count == 1)
    }

    #[instrument(skip(self, finalization), fields(bill_number = %finalization.bill_number))]
    async fn finalize_bill(
        &self,
        bill_id: &str,
        expected_version: i64,
        finalization: &BillFinalization,
    ) -> Result<bool, AppError> {
        let update = doc! {
            "$set": bson::to_document(finalization)?,
            "$inc": { "version": 1_i64 },
        };

        let filter = doc! {
            "_id": bill_id,
            "version": expected_version,
            "payment_mode": Bson::Null,
            "is_deleted": { "$ne": true },
        };

        let result = self
            .bills()
            .update_one(filter, update, None)
            .await
            .map_err(db_error("Failed to finalize bill"))?;
        Ok(result.modified_count == 1)
    }

    #[instrument(skip(self))]
    async fn soft_delete_bill(&self, bill_id: &str, at: DateTime<Utc>) -> Result<bool, AppError> {
        let at = bson::DateTime::from_chrono(at);
        let result = self
            .bills()
            .update_one(
                doc! { "_id": bill_id, "is_deleted": { "$ne": true } },
                doc! {
                    "$set": { "is_deleted": true, "deleted_at": at, "updated_at": at },
                    "$inc": { "version": 1_i64 },
                },
                None,
            )
            .await
            .map_err(db_error("Failed to delete bill"))?;
        Ok(result.modified_count == 1)
    }

    #[instrument(skip(self))]
    async fn next_bill_sequence(&self, branch_id: &str) -> Result<u64, AppError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let counter = self
            .counters()
            .find_one_and_update(
                doc! { "_id": format!("bill:{}", branch_id) },
                doc! { "$inc": { "seq": 1_i64 } },
                options,
            )
            .await
            .map_err(db_error("Failed to advance bill sequence"))?
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!("Bill counter upsert returned nothing"))
            })?;

        match counter.get("seq") {
            Some(Bson::Int64(seq)) => Ok(*seq as u64),
            Some(Bson::Int32(seq)) => Ok(*seq as u64),
            Some(Bson::Double(seq)) => Ok(*seq as u64),
            other => Err(AppError::InternalError(anyhow::anyhow!(
                "Unexpected bill counter value: {:?}",
                other
            ))),
        }
    }

    #[instrument(skip(self), fields(item_type = item_type.as_str()))]
    async fn find_catalog_entry(
        &self,
        item_type: ItemType,
        ref_id: &str,
    ) -> Result<Option<CatalogEntry>, AppError> {
        if item_type == ItemType::Product {
            return Ok(self.get_product(ref_id).await?.map(CatalogEntry::from));
        }

        self.db
            .collection::<CatalogEntry>(item_type.catalog_collection())
            .find_one(doc! { "_id": ref_id }, None)
            .await
            .map_err(db_error("Failed to fetch catalog entry"))
    }

    #[instrument(skip(self))]
    async fn get_product(&self, product_id: &str) -> Result<Option<Product>, AppError> {
        self.products()
            .find_one(doc! { "_id": product_id }, None)
            .await
            .map_err(db_error("Failed to fetch product"))
    }

    #[instrument(skip(self))]
    async fn decrement_stock(&self, product_id: &str, quantity: i64) -> Result<bool, AppError> {
        let result = self
            .products()
            .update_one(
                doc! { "_id": product_id, "stock_quantity": { "$gte": quantity } },
                doc! { "$inc": { "stock_quantity": -quantity } },
                None,
            )
            .await
            .map_err(db_error("Failed to decrement stock"))?;
        Ok(result.modified_count == 1)
    }

    #[instrument(skip(self))]
    async fn increment_stock(&self, product_id: &str, quantity: i64) -> Result<(), AppError> {
        self.products()
            .update_one(
                doc! { "_id": product_id },
                doc! { "$inc": { "stock_quantity": quantity } },
                None,
            )
            .await
            .map_err(db_error("Failed to increment stock"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_active_membership(
        &self,
        customer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Membership>, AppError> {
        let filter = doc! {
            "customer_id": customer_id,
            "status": MembershipStatus::Active.as_str(),
            "expiry_date": { "$gt": bson::DateTime::from_chrono(now) },
        };
        let options = FindOneOptions::builder()
            .sort(doc! { "expiry_date": -1 })
            .build();

        self.db
            .collection::<Membership>("memberships")
            .find_one(filter, options)
            .await
            .map_err(db_error("Failed to fetch membership"))
    }

    #[instrument(skip(self))]
    async fn get_membership_plan(&self, plan_id: &str) -> Result<Option<MembershipPlan>, AppError> {
        self.db
            .collection::<MembershipPlan>(ItemType::Membership.catalog_collection())
            .find_one(doc! { "_id": plan_id }, None)
            .await
            .map_err(db_error("Failed to fetch membership plan"))
    }

    #[instrument(skip(self))]
    async fn get_prepaid_package(
        &self,
        package_id: &str,
    ) -> Result<Option<PrepaidPackage>, AppError> {
        self.prepaid_packages()
            .find_one(doc! { "_id": package_id }, None)
            .await
            .map_err(db_error("Failed to fetch prepaid package"))
    }

    #[instrument(skip(self, amount), fields(amount = %amount))]
    async fn debit_prepaid(
        &self,
        package_id: &str,
        amount: Decimal,
    ) -> Result<Option<PrepaidPackage>, AppError> {
        let amount = amount.to_f64().unwrap_or_default();
        let filter = doc! {
            "_id": package_id,
            "status": PrepaidStatus::Active.as_str(),
            "remaining_balance": { "$gte": amount },
        };
        self.adjust_prepaid(filter, -amount).await
    }

    #[instrument(skip(self, amount), fields(amount = %amount))]
    async fn credit_prepaid(&self, package_id: &str, amount: Decimal) -> Result<(), AppError> {
        let amount = amount.to_f64().unwrap_or_default();
        self.adjust_prepaid(doc! { "_id": package_id }, amount).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn credit_loyalty_points(&self, customer_id: &str, points: i64) -> Result<(), AppError> {
        self.db
            .collection::<Document>("customers")
            .update_one(
                doc! { "_id": customer_id },
                doc! { "$inc": { "loyalty_points": points } },
                None,
            )
            .await
            .map_err(db_error("Failed to credit loyalty points"))?;
        Ok(())
    }
}
