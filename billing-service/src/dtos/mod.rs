pub mod bills;

pub use bills::{
    AddItemRequest, BillItemResponse, BillListResponse, BillResponse, CheckoutRequest,
    CheckoutResponse, CreateBillRequest, ListBillsParams,
};
