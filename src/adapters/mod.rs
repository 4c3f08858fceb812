//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter            | Implements       | Connects to                  |
//! |--------------------|------------------|------------------------------|
//! | `hardware`         | HalPort          | ESP32 GPIO, UART2, LEDC, I²C |
//! | `nvs`              | StoragePort      | NVS / in-memory store        |
//! |                    | PersistencePort  | postcard blobs per profile   |
//! | `serial_transport` | Transport        | UART0 / stdin + stdout       |

pub mod hardware;
pub mod nvs;
pub mod serial_transport;
