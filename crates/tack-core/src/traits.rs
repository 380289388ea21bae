//! Core traits shared by records and their attachments

/// Primary key type of an owning record
pub type Id = i64;

/// Trait for records that have a primary key
pub trait Identifiable {
    fn id(&self) -> Option<Id>;

    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }

    fn is_new_record(&self) -> bool {
        !self.is_persisted()
    }
}

/// A record that can own attachments.
///
/// `class_name` is the namespaced type name of the record (segments joined
/// with `::`). It feeds the `:class` and `:class_name` path tags, so the
/// default, Rust's own type path, yields paths like `my_app/models/users`.
pub trait AttachmentOwner: Identifiable {
    fn class_name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}
