//! Database entities for the commerce and settlement core.

pub mod address;
pub mod cart;
pub mod cart_item;
pub mod consultation;
pub mod coupon;
pub mod doctor;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod payout;
pub mod prescription;
pub mod product;

// Re-export entities
pub use address::{Entity as Address, Model as AddressModel};
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use consultation::{ConsultationStatus, Entity as Consultation, Model as ConsultationModel};
pub use coupon::{CouponKind, Entity as Coupon, Model as CouponModel};
pub use doctor::{Entity as Doctor, Model as DoctorModel};
pub use order::{
    Entity as Order, Model as OrderModel, OrderPaymentStatus, OrderStatus,
};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel, OrderItemStatus};
pub use payment::{Entity as Payment, Model as PaymentModel, PaymentStatus};
pub use payout::{Entity as Payout, Model as PayoutModel, PayoutStatus};
pub use prescription::{Entity as Prescription, Model as PrescriptionModel, PrescribedMedication};
pub use product::{Entity as Product, Model as ProductModel, ProductType};
