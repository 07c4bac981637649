//! In-memory data behind the mock tools.  Nothing here survives a restart.
use super::catalog::ToolError;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: u64,
    pub user_id: u64,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: u64,
    pub user_id: u64,
    pub product_id: u64,
    pub quantity: u64,
    pub total: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts reported by the `get_stats` tool
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_users: usize,
    pub total_posts: usize,
    pub total_products: usize,
    pub total_orders: usize,
    pub total_revenue: f64,
    pub products_in_stock: usize,
}

#[derive(Debug)]
pub struct DataStore {
    users: Vec<User>,
    posts: Vec<Post>,
    products: Vec<Product>,
    orders: Vec<Order>,
}

impl DataStore {
    /// An empty store
    pub fn empty() -> Self {
        Self {
            users: Vec::new(),
            posts: Vec::new(),
            products: Vec::new(),
            orders: Vec::new(),
        }
    }

    /// A store pre-populated with a handful of records of every kind
    pub fn seeded() -> Self {
        let now = Utc::now();
        let days_ago = |days: i64| now - Duration::days(days);

        let mut store = Self::empty();
        for (name, email, role, age) in [
            ("Alice Johnson", "alice@example.com", "admin", 90),
            ("Bob Smith", "bob@example.com", "user", 60),
            ("Carol White", "carol@example.com", "user", 30),
            ("Dave Brown", "dave@example.com", "moderator", 10),
        ] {
            let id = store.next_user_id();
            store.users.push(User {
                id,
                name: name.to_string(),
                email: email.to_string(),
                role: role.to_string(),
                created_at: days_ago(age),
            });
        }

        for (user_id, title, body, age) in [
            (1, "Getting started with MCP", "A short tour of the protocol.", 20),
            (1, "Streaming data over WebSockets", "Push beats polling.", 12),
            (2, "My first post", "Hello, world!", 8),
            (3, "Sensor dashboards", "Temperature and humidity, live.", 2),
        ] {
            let id = store.next_post_id();
            store.posts.push(Post {
                id,
                user_id,
                title: title.to_string(),
                body: body.to_string(),
                created_at: days_ago(age),
            });
        }

        for (name, category, price, stock) in [
            ("Laptop", "electronics", 999.99, 15),
            ("Headphones", "electronics", 149.5, 42),
            ("Coffee Mug", "kitchen", 12.0, 120),
            ("Desk Lamp", "home", 35.25, 0),
            ("Notebook", "office", 4.99, 300),
        ] {
            let id = store.next_product_id();
            store.products.push(Product {
                id,
                name: name.to_string(),
                category: category.to_string(),
                price,
                stock,
            });
        }

        for (user_id, product_id, quantity, status, age) in [
            (2, 1, 1, "delivered", 25),
            (3, 3, 4, "shipped", 3),
            (2, 5, 10, "pending", 1),
        ] {
            let id = store.next_order_id();
            let total = store
                .products
                .iter()
                .find(|p| p.id == product_id)
                .map(|p| round_cents(p.price * quantity as f64))
                .unwrap_or_default();
            store.orders.push(Order {
                id,
                user_id,
                product_id,
                quantity,
                total,
                status: status.to_string(),
                created_at: days_ago(age),
            });
        }

        store
    }

    pub fn users(&self, role: Option<&str>, limit: Option<usize>) -> Vec<User> {
        self.users
            .iter()
            .filter(|u| role.map_or(true, |role| u.role == role))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn user(&self, id: u64) -> Result<User, ToolError> {
        self.users
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or(ToolError::NotFound { entity: "User", id })
    }

    pub fn insert_user(&mut self, name: String, email: String, role: String) -> User {
        let user = User {
            id: self.next_user_id(),
            name,
            email,
            role,
            created_at: Utc::now(),
        };
        self.users.push(user.clone());
        user
    }

    pub fn posts(&self, user_id: Option<u64>) -> Vec<Post> {
        self.posts
            .iter()
            .filter(|p| user_id.map_or(true, |id| p.user_id == id))
            .cloned()
            .collect()
    }

    /// Fails without touching the store if the author doesn't exist
    pub fn insert_post(
        &mut self,
        user_id: u64,
        title: String,
        body: String,
    ) -> Result<Post, ToolError> {
        self.user(user_id)?;

        let post = Post {
            id: self.next_post_id(),
            user_id,
            title,
            body,
            created_at: Utc::now(),
        };
        self.posts.push(post.clone());
        Ok(post)
    }

    pub fn products(&self, category: Option<&str>, in_stock: Option<bool>) -> Vec<Product> {
        self.products
            .iter()
            .filter(|p| category.map_or(true, |c| p.category == c))
            .filter(|p| in_stock.map_or(true, |in_stock| (p.stock > 0) == in_stock))
            .cloned()
            .collect()
    }

    pub fn orders(&self, user_id: Option<u64>) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|o| user_id.map_or(true, |id| o.user_id == id))
            .cloned()
            .collect()
    }

    /// Place an order, taking the quantity out of the product's stock.
    ///
    /// Every check happens before anything is modified, so a failed order leaves the store as it
    /// was.
    pub fn insert_order(
        &mut self,
        user_id: u64,
        product_id: u64,
        quantity: u64,
    ) -> Result<Order, ToolError> {
        self.user(user_id)?;
        let product = self
            .products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or(ToolError::NotFound {
                entity: "Product",
                id: product_id,
            })?;

        if product.stock < quantity {
            return Err(ToolError::InsufficientStock {
                product_id,
                requested: quantity,
                available: product.stock,
            });
        }

        product.stock -= quantity;
        let total = round_cents(product.price * quantity as f64);

        let order = Order {
            id: self.next_order_id(),
            user_id,
            product_id,
            quantity,
            total,
            status: "pending".to_string(),
            created_at: Utc::now(),
        };
        self.orders.push(order.clone());
        Ok(order)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            total_users: self.users.len(),
            total_posts: self.posts.len(),
            total_products: self.products.len(),
            total_orders: self.orders.len(),
            total_revenue: round_cents(self.orders.iter().map(|o| o.total).sum()),
            products_in_stock: self.products.iter().filter(|p| p.stock > 0).count(),
        }
    }

    fn next_user_id(&self) -> u64 {
        self.users.iter().map(|u| u.id).max().unwrap_or(0) + 1
    }

    fn next_post_id(&self) -> u64 {
        self.posts.iter().map(|p| p.id).max().unwrap_or(0) + 1
    }

    fn next_product_id(&self) -> u64 {
        self.products.iter().map(|p| p.id).max().unwrap_or(0) + 1
    }

    fn next_order_id(&self) -> u64 {
        self.orders.iter().map(|o| o.id).max().unwrap_or(0) + 1
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::seeded()
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn filters_users_by_role_and_limit() {
        let store = DataStore::seeded();
        assert_eq!(store.users(None, None).len(), 4);
        assert_eq!(store.users(Some("user"), None).len(), 2);
        assert_eq!(store.users(None, Some(1))[0].name, "Alice Johnson");
        assert!(store.users(Some("nobody"), None).is_empty());
    }

    #[test]
    fn order_takes_stock() {
        let mut store = DataStore::seeded();
        let order = store.insert_order(1, 2, 2).unwrap();
        assert_eq!(order.total, 299.0);
        assert_eq!(order.status, "pending");
        assert_eq!(store.products(None, None)[1].stock, 40);
    }

    #[test]
    fn failed_order_changes_nothing() {
        let mut store = DataStore::seeded();
        let before = (store.orders(None), store.products(None, None));

        assert_matches!(
            store.insert_order(1, 4, 1),
            Err(ToolError::InsufficientStock { available: 0, .. })
        );
        assert_matches!(
            store.insert_order(99, 1, 1),
            Err(ToolError::NotFound { entity: "User", id: 99 })
        );
        assert_matches!(
            store.insert_order(1, 99, 1),
            Err(ToolError::NotFound { entity: "Product", .. })
        );

        assert_eq!((store.orders(None), store.products(None, None)), before);
    }

    #[test]
    fn out_of_stock_filter() {
        let store = DataStore::seeded();
        let unavailable = store.products(None, Some(false));
        assert_eq!(unavailable.len(), 1);
        assert_eq!(unavailable[0].name, "Desk Lamp");
        assert_eq!(store.products(Some("electronics"), Some(true)).len(), 2);
    }

    #[test]
    fn ids_keep_increasing() {
        let mut store = DataStore::seeded();
        let user = store.insert_user("Eve".into(), "eve@example.com".into(), "user".into());
        assert_eq!(user.id, 5);
        let post = store.insert_post(user.id, "t".into(), "b".into()).unwrap();
        assert_eq!(post.id, 5);
        assert_eq!(store.stats().total_users, 5);
    }
}
